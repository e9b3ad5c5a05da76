/// Column-name constants and reference vocabularies.
/// Single source of truth for the pipeline, the reports and the Python exports.

// ── Source columns ──────────────────────────────────────────────────────────
pub mod record {
    pub const REGION: &str = "DIREC";
    pub const MUNICIPALITY: &str = "MUNICÍPIO";
    pub const SCHOOL: &str = "ESCOLA";
    pub const SCHOOL_ID: &str = "INEP ESCOLA";
    pub const GRADE_LEVEL: &str = "SÉRIE";
    pub const SUBJECT: &str = "COMPONENTE CURRICULAR";
    pub const STUDENT_ID: &str = "CPF PESSOA";
}

// ── Score columns ───────────────────────────────────────────────────────────
pub mod scores {
    pub const BIMESTER_1: &str = "NOTA 1º BIMESTRE";
    pub const BIMESTER_2: &str = "NOTA 2º BIMESTRE";
    pub const BIMESTER_3: &str = "NOTA 3º BIMESTRE";
    pub const BIMESTER_4: &str = "NOTA 4º BIMESTRE";
    pub const ANNUAL_AVERAGE: &str = "MÉDIA ANUAL";
    pub const FINAL_EXAM: &str = "EXAME FINAL";
    pub const SPECIAL_ASSESSMENT: &str = "AVALIAÇÃO ESPECIAL";
    pub const FINAL_AVERAGE: &str = "MÉDIA FINAL";

    pub const ALL: [&str; 8] = [
        BIMESTER_1,
        BIMESTER_2,
        BIMESTER_3,
        BIMESTER_4,
        ANNUAL_AVERAGE,
        FINAL_EXAM,
        SPECIAL_ASSESSMENT,
        FINAL_AVERAGE,
    ];

    /// Terms reported on the grade-entry page.
    pub const REPORTED_TERMS: [&str; 3] = [BIMESTER_1, BIMESTER_2, BIMESTER_3];
}

// ── Derived columns ─────────────────────────────────────────────────────────
pub mod derived {
    pub const STAGE: &str = "ETAPA_RESUMIDA";
    pub const TERM_1_2_AVERAGE: &str = "MEDIA_1_2_BIM";
    pub const STATUS: &str = "STATUS";
    pub const SCHOOL_LABEL: &str = "ESCOLA_FORMATADA";
}

// ── Report columns ──────────────────────────────────────────────────────────
pub mod report {
    pub const TOTAL: &str = "total";
    pub const PCT_PREFIX: &str = "pct_";
    pub const FAILING_SUBJECTS: &str = "failing_subjects";
    pub const STUDENT_STATUS: &str = "student_status";
    pub const PASSING: &str = "passing";
    pub const FAILING: &str = "failing";
    pub const MISSING: &str = "missing";
    pub const ENTERED: &str = "entered";
    pub const TERM: &str = "term";
}

// ── Roster columns ──────────────────────────────────────────────────────────
pub mod roster {
    pub const ID: &str = "CPF";
}

// ── Status values ───────────────────────────────────────────────────────────
pub mod status {
    pub const NO_GRADE: &str = "Sem nota";
    pub const PASSING: &str = "Aprovado";
    pub const FAILING: &str = "Reprovado";
}

// ── Stage labels ────────────────────────────────────────────────────────────
pub mod stage {
    pub const LOWER_SECONDARY: &str = "Ens. Fund. - Anos Finais";
    pub const UPPER_SECONDARY: &str = "Ensino Médio";
}

// ── Filter sentinels ────────────────────────────────────────────────────────
pub mod sentinel {
    pub const ALL_REGIONS: &str = "Todas";
    pub const ALL_MUNICIPALITIES: &str = "Todos";
    pub const ALL_SCHOOLS: &str = "Todas";
}

/// Administrative and audit columns dropped before any processing.
pub const PRUNED_COLUMNS: [&str; 21] = [
    "ID DIREC",
    "ID MUNICÍPIO",
    "ID ESCOLA",
    "ID ETAPA ENSINO",
    "PERIODICIDADE ETAPA ENSINO",
    "ID SÉRIE",
    "ID TURMA",
    "TURMA",
    "TURNO",
    "ID PESSOA (PROFESSOR)",
    "MATRICULA (PROFESSOR)",
    "VÍNCULO",
    "NOME DO PROFESSOR",
    "DATA INÍCIO ALOCAÇÃO",
    "DATA FIM ALOCAÇÃO",
    "ID COMPONENTE CURRICULAR",
    "PERIODICIDADE COMPONENTE CURRICULAR",
    "ID PESSOA",
    "MATRÍCULA ESTUDANTE",
    "RESULTADO FINAL",
    "APROVEITAMENTO DE ESTUDO",
];

/// Nationally mandated curricular subjects (BNCC).
pub const BNCC_SUBJECTS: [&str; 13] = [
    "Arte",
    "Biologia",
    "Educação Física",
    "Filosofia",
    "Física",
    "Geografia",
    "História",
    "Língua Inglesa",
    "Língua Portuguesa",
    "Matemática",
    "Química",
    "Sociologia",
    "Ciências",
];

/// Numeric identifier columns parsed to integers before compaction.
pub const INTEGER_COLUMNS: [&str; 1] = [record::SCHOOL_ID];

/// Width of a normalized student identifier.
pub const STUDENT_ID_WIDTH: usize = 11;
