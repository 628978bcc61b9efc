use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

use crate::normalize::{clean_label, fold_accents};

pub const CATALOG_FILE_NAME: &str = "catalog.json";
pub const DEFAULT_SUBSTRING_MIN_LEN: usize = 4;

// Patterns are matched case-insensitively against the accent-folded label,
// so they are written without accents.
const BUILTIN_REWRITE_RULES: &[(&str, &str)] = &[
    (r"^CONSTR\.?\s*DE\s*CIUD\.?\s*-?\s*.*$", "CONSTRUCCIÓN DE CIUDADANÍA"),
    (r"^CONSTRUCCION\s*DE\s*CIUDADANIA.*$", "CONSTRUCCIÓN DE CIUDADANÍA"),
    (r"^CONST\.?\s*CIUDADANIA.*$", "CONSTRUCCIÓN DE CIUDADANÍA"),
    (r"^DIBUJO\s*TECNOLOGICO$", "DIBUJO TECNOLÓGICO"),
    (r"^MAQUINAS\s*ELECTRICAS\s*Y\s*AUTOMATISMOS$", "MÁQUINAS ELÉCTRICAS Y AUTOMATISMOS"),
    (r"^MAQ\.?\s*ELEC\.?\s*Y\s*AUTOMATISMOS$", "MÁQUINAS ELÉCTRICAS Y AUTOMATISMOS"),
    (r"^ANALISIS\s*MATEMATICO$", "ANÁLISIS MATEMÁTICO"),
    (r"^MECANICA\s*Y\s*MECANISMOS$", "MECÁNICA Y MECANISMOS"),
    (r"^RESISTENCIA\s*Y\s*ENSAYO\s*DE\s*MATERIALES$", "RESISTENCIA Y ENSAYO DE MATERIALES"),
    (r"^POLITICA\s*Y\s*CIUDADANIA$", "POLÍTICA Y CIUDADANÍA"),
    (r"^TERMO\.?\s*Y\s*MAQ\.?\s*TERMICAS.*$", "TERMODINÁMICA Y MÁQUINAS TÉRMICAS"),
    (r"^TERMODINAMICA\s*Y\s*MAQUINAS\s*TERMICAS.*$", "TERMODINÁMICA Y MÁQUINAS TÉRMICAS"),
    (r"^SIST\.?\s*MECANICOS.*$", "SISTEMAS MECÁNICOS"),
    (r"^SISTEMAS\s*MECANICOS.*$", "SISTEMAS MECÁNICOS"),
    (r"^LAB\.?\s*DE\s*MED\.?\s*ELECTRICAS.*$", "LABORATORIO DE MEDICIONES ELÉCTRICAS"),
    (r"^LABORATORIO\s*DE\s*MEDICIONES\s*ELECTRICAS.*$", "LABORATORIO DE MEDICIONES ELÉCTRICAS"),
    (r"^DERECHOS\s*DEL\s*TRABAJO$", "DERECHOS DEL TRABAJO"),
    (r"^PRACTICAS\s*PROFESIONALIZANTES$", "PRÁCTICAS PROFESIONALIZANTES"),
    (
        r"^EMPRENDIMIENTOS\s*PRODUCTIVOS\s*Y\s*DESARROLLO\s*LOCAL$",
        "EMPRENDIMIENTOS PRODUCTIVOS Y DESARROLLO LOCAL",
    ),
    (r"^ELECTRONICA\s*INDUSTRIAL$", "ELECTRÓNICA INDUSTRIAL"),
    (
        r"^SEGURIDAD,?\s*HIGIENE\s*Y\s*PROTECCION\s*DEL\s*MEDIO\s*AMBIENTE$",
        "SEGURIDAD, HIGIENE Y PROTECCIÓN DEL MEDIO AMBIENTE",
    ),
    (
        r"^LABORATORIO\s*DE\s*METROLOGIA\s*Y\s*CONTROL\s*DE\s*CALIDAD$",
        "LABORATORIO DE METROLOGÍA Y CONTROL DE CALIDAD",
    ),
    (
        r"^MANTENIMIENTO\s*Y\s*MONTAJE\s*ELECTROMECANICO$",
        "MANTENIMIENTO Y MONTAJE ELECTROMECÁNICO",
    ),
    (r"^PROYECTO\s*Y\s*DISENO\s*ELECTROMECANICO$", "PROYECTO Y DISEÑO ELECTROMECÁNICO"),
    (
        r"^PROYECTO\s*Y\s*DISENO\s*DE\s*INSTALACIONES\s*ELECTRICAS$",
        "PROYECTO Y DISEÑO DE INSTALACIONES ELÉCTRICAS",
    ),
    (r"^PRACTICAS\s*DEL\s*LENGUAJE$", "PRÁCTICAS DEL LENGUAJE"),
    (r"^(EDUCACION|ED\.?)\s*FISICA$", "EDUCACIÓN FÍSICA"),
    (r"^(EDUCACION|ED\.?)\s*ARTISTICA$", "EDUCACIÓN ARTÍSTICA"),
    (r"^FISICO\s*-?\s*QUIMICA$", "FÍSICO QUÍMICA"),
    (r"^CIENCIAS\s*NAT\.?$", "CIENCIAS NATURALES"),
    (r"^CIENCIAS\s*SOC\.?$", "CIENCIAS SOCIALES"),
    (r"^LENG\.?\s*TECNOLOGICOS$", "LENGUAJES TECNOLÓGICOS"),
    (r"^SIST\.?\s*TECNOLOGICOS$", "SISTEMAS TECNOLÓGICOS"),
    (r"^PROC\.?\s*TECNICOS$", "PROCEDIMIENTOS TÉCNICOS"),
    (r"^MATEMATICA$", "MATEMÁTICA"),
    (r"^MATEMATICA\s*APLICADA$", "MATEMÁTICA APLICADA"),
    (r"^GEOGRAFIA$", "GEOGRAFÍA"),
    (r"^BIOLOGIA$", "BIOLOGÍA"),
    (r"^HISTORIA$", "HISTORIA"),
    (r"^INGLES$", "INGLÉS"),
    (r"^LITERATURA$", "LITERATURA"),
    (r"^FILOSOFIA$", "FILOSOFÍA"),
    (r"^FISICA$", "FÍSICA"),
    (r"^QUIMICA$", "QUÍMICA"),
    (r"^ELECTROTECNIA$", "ELECTROTECNIA"),
    (r"^DISENO\s*Y\s*PROC\.?\s*MECANICO$", "DISEÑO Y PROCESAMIENTO MECÁNICO"),
    (r"^DISENO\s*Y\s*PROCESAMIENTO\s*MEC\.?$", "DISEÑO Y PROCESAMIENTO MECÁNICO"),
    (r"^INST\.?\s*Y\s*APLIC\.?\s*ENERGIA$", "INSTALACIONES Y APLICACIONES DE LA ENERGÍA"),
    (
        r"^INSTALACION\s*Y\s*APLIC\.?\s*DE\s*LA\s*ENERGIA$",
        "INSTALACIONES Y APLICACIONES DE LA ENERGÍA",
    ),
    (
        r"^INSTALACIONES\s*Y\s*APLICACIONES\s*DE\s*LA\s*ENERGIA$",
        "INSTALACIONES Y APLICACIONES DE LA ENERGÍA",
    ),
    (r"^CONOCIMIENTO\s*DE\s*LOS\s*MATERIALES$", "CONOCIMIENTO DE LOS MATERIALES"),
    (r"^SALUD\s*Y\s*ADOLESCENCIA$", "SALUD Y ADOLESCENCIA"),
];

const BUILTIN_EQUIVALENCES: &[(&str, &[&str])] = &[
    (
        "CONSTRUCCIÓN DE CIUDADANÍA",
        &[
            "CONSTR. DE CIUD. - MADERAS",
            "CONSTR. DE CIUD. - METALES",
            "CONSTR. DE CIUD. - ELECTRICIDAD",
            "CONSTRUCCION DE CIUDADANIA",
            "CONST. CIUDADANIA",
            "CONSTR. DE CIUDADANIA",
            "CONSTR DE CIUD - MADERAS",
            "CONSTR DE CIUD - METALES",
            "CONSTR DE CIUD - ELECTRICIDAD",
        ],
    ),
    ("FÍSICO QUÍMICA", &["FISICO QUIMICA", "FÍSICO-QUÍMICA", "FISICOQUIMICA"]),
    (
        "PRÁCTICAS DEL LENGUAJE",
        &["PRACTICAS DEL LENGUAJE", "PRACTICAS LENGUAJE", "LENGUA"],
    ),
    ("EDUCACIÓN FÍSICA", &["EDUCACION FISICA", "ED. FISICA", "ED FISICA"]),
    (
        "EDUCACIÓN ARTÍSTICA",
        &["EDUCACION ARTISTICA", "ED. ARTISTICA", "ED ARTISTICA"],
    ),
    ("CIENCIAS NATURALES", &["CIENCIAS NAT.", "C. NATURALES"]),
    ("CIENCIAS SOCIALES", &["CIENCIAS SOC.", "C. SOCIALES"]),
    (
        "LENGUAJES TECNOLÓGICOS",
        &["LENGUAJES TECNOLOGICOS", "LENG. TECNOLOGICOS"],
    ),
    (
        "SISTEMAS TECNOLÓGICOS",
        &["SISTEMAS TECNOLOGICOS", "SIST. TECNOLOGICOS"],
    ),
    (
        "PROCEDIMIENTOS TÉCNICOS",
        &["PROCEDIMIENTOS TECNICOS", "PROC. TECNICOS"],
    ),
    ("BIOLOGÍA", &["BIOLOGIA"]),
    ("INGLÉS", &["INGLES"]),
    ("MATEMÁTICA", &["MATEMATICA"]),
    ("GEOGRAFÍA", &["GEOGRAFIA"]),
    ("HISTORIA", &["HIST"]),
    ("FILOSOFÍA", &["FILOSOFIA"]),
    ("FÍSICA", &["FISICA"]),
    ("QUÍMICA", &["QUIMICA"]),
    ("DIBUJO TECNOLÓGICO", &["DIBUJO TECNOLOGICO"]),
    ("CONOCIMIENTO DE LOS MATERIALES", &["CONOCIMIENTO DE MATERIALES"]),
    ("SALUD Y ADOLESCENCIA", &["SALUD Y ADOLESC."]),
    ("ANÁLISIS MATEMÁTICO", &["ANALISIS MATEMATICO"]),
    ("MECÁNICA Y MECANISMOS", &["MECANICA Y MECANISMOS"]),
    (
        "RESISTENCIA Y ENSAYO DE MATERIALES",
        &["RESISTENCIA Y ENSAYO MATERIALES", "RESIST. Y ENSAYO MAT."],
    ),
    ("POLÍTICA Y CIUDADANÍA", &["POLITICA Y CIUDADANIA"]),
    (
        "TERMODINÁMICA Y MÁQUINAS TÉRMICAS",
        &[
            "TERMO. Y MAQ. TÉRMICAS ELECTROTECNIA",
            "TERMODINAMICA Y MAQUINAS TERMICAS",
            "TERMO. Y MAQ. TERMICAS",
            "TERMODINÁMICA Y MÁQUINAS TÉRMICAS ELECTROTECNIA",
            "TERMO Y MAQ TERMICAS",
        ],
    ),
    (
        "SISTEMAS MECÁNICOS",
        &[
            "SIST. MECÁNICOS DERECHOS DEL TRABAJO",
            "SISTEMAS MECANICOS",
            "SIST. MECANICOS",
        ],
    ),
    (
        "LABORATORIO DE MEDICIONES ELÉCTRICAS",
        &[
            "LABORATORIO DE MED. ELÉCTRICAS",
            "LABORATORIO DE MEDICIONES ELECTRICAS",
            "LAB. DE MEDICIONES ELECTRICAS",
            "LAB. MED. ELECTRICAS",
        ],
    ),
    ("DERECHOS DEL TRABAJO", &["DERECHOS TRABAJO", "DERECHOS DEL TRAB."]),
    ("MATEMÁTICA APLICADA", &["MATEMATICA APLICADA"]),
    ("PRÁCTICAS PROFESIONALIZANTES", &["PRACTICAS PROFESIONALIZANTES"]),
    (
        "EMPRENDIMIENTOS PRODUCTIVOS Y DESARROLLO LOCAL",
        &["EMPRENDIMIENTOS PROD. Y DESARROLLO LOCAL"],
    ),
    ("ELECTRÓNICA INDUSTRIAL", &["ELECTRONICA INDUSTRIAL"]),
    (
        "SEGURIDAD, HIGIENE Y PROTECCIÓN DEL MEDIO AMBIENTE",
        &[
            "SEGURIDAD HIGIENE Y PROTECCION DEL MEDIO AMBIENTE",
            "SEG., HIG. Y PROT. DEL MEDIO AMB.",
        ],
    ),
    (
        "LABORATORIO DE METROLOGÍA Y CONTROL DE CALIDAD",
        &[
            "LAB. DE METROLOGIA Y CONTROL DE CALIDAD",
            "LABORATORIO METROLOGIA Y CONTROL CALIDAD",
        ],
    ),
    (
        "MANTENIMIENTO Y MONTAJE ELECTROMECÁNICO",
        &[
            "MANTENIMIENTO Y MONTAJE ELECTROMECANICO",
            "MANT. Y MONTAJE ELECTROMECANICO",
        ],
    ),
    (
        "PROYECTO Y DISEÑO ELECTROMECÁNICO",
        &[
            "PROYECTO Y DISEÑO ELECTROMECANICO",
            "PROY. Y DISEÑO ELECTROMECANICO",
        ],
    ),
    (
        "PROYECTO Y DISEÑO DE INSTALACIONES ELÉCTRICAS",
        &[
            "PROYECTO Y DISEÑO DE INSTALACIONES ELECTRICAS",
            "PROY. Y DISEÑO DE INST. ELECTRICAS",
        ],
    ),
    (
        "MÁQUINAS ELÉCTRICAS Y AUTOMATISMOS",
        &[
            "MAQUINAS ELECTRICAS Y AUTOMATISMOS",
            "MAQ. ELEC. Y AUTOMATISMOS",
            "MAQUINAS ELEC. Y AUTOMATISMOS",
        ],
    ),
    (
        "DISEÑO Y PROCESAMIENTO MECÁNICO",
        &[
            "DISEÑO Y PROCESAMIENTO MEC.",
            "DISEÑO Y PROC. MECANICO",
            "DISEÑO Y PROCESAMIENTO MECANICO",
        ],
    ),
    (
        "INSTALACIONES Y APLICACIONES DE LA ENERGÍA",
        &[
            "INSTALACION Y APLIC. DE LA ENERGIA",
            "INST. Y APLIC. ENERGIA",
            "INSTALACIONES Y APLIC. DE LA ENERGIA",
            "INSTALACION Y APLICACIONES DE LA ENERGIA",
        ],
    ),
];

const BUILTIN_KEYWORDS: &[(&str, &[&str])] = &[
    ("TERMODINÁMICA", &["TERMO", "TÉRMICAS"]),
    ("SISTEMAS MECÁNICOS", &["SIST", "MECÁNICOS"]),
    ("LABORATORIO", &["LAB"]),
    ("MEDICIONES", &["MED"]),
    ("ELÉCTRICAS", &["ELEC"]),
    ("MÁQUINAS", &["MAQ"]),
    ("APLICACIONES", &["APLIC"]),
    ("INSTALACIONES", &["INST"]),
    ("CONSTRUCCIÓN", &["CONSTR"]),
    ("CIUDADANÍA", &["CIUD"]),
    ("ANÁLISIS", &["ANALISIS"]),
    ("MECÁNICA", &["MECANICA"]),
    ("PRÁCTICAS", &["PRACTICAS"]),
    ("PROFESIONALIZANTES", &["PROF"]),
];

const BUILTIN_COHORT_ORDER: &[(i32, &[&str])] = &[
    (
        1,
        &[
            "PRÁCTICAS DEL LENGUAJE",
            "CIENCIAS SOCIALES",
            "CONSTRUCCIÓN DE CIUDADANÍA",
            "EDUCACIÓN FÍSICA",
            "EDUCACIÓN ARTÍSTICA",
            "INGLÉS",
            "MATEMÁTICA",
            "CIENCIAS NATURALES",
            "LENGUAJES TECNOLÓGICOS",
            "SISTEMAS TECNOLÓGICOS",
            "PROCEDIMIENTOS TÉCNICOS",
        ],
    ),
    (2, SECOND_AND_THIRD_YEAR),
    (3, SECOND_AND_THIRD_YEAR),
    (
        4,
        &[
            "LITERATURA",
            "INGLÉS",
            "EDUCACIÓN FÍSICA",
            "SALUD Y ADOLESCENCIA",
            "HISTORIA",
            "GEOGRAFÍA",
            "MATEMÁTICA",
            "FÍSICA",
            "QUÍMICA",
            "CONOCIMIENTO DE LOS MATERIALES",
            "DIBUJO TECNOLÓGICO",
            "MÁQUINAS ELÉCTRICAS Y AUTOMATISMOS",
            "DISEÑO Y PROCESAMIENTO MECÁNICO",
            "INSTALACIONES Y APLICACIONES DE LA ENERGÍA",
        ],
    ),
    (
        5,
        &[
            "LITERATURA",
            "INGLÉS",
            "EDUCACIÓN FÍSICA",
            "POLÍTICA Y CIUDADANÍA",
            "HISTORIA",
            "GEOGRAFÍA",
            "ANÁLISIS MATEMÁTICO",
            "MECÁNICA Y MECANISMOS",
            "ELECTROTECNIA",
            "RESISTENCIA Y ENSAYO DE MATERIALES",
            "MÁQUINAS ELÉCTRICAS Y AUTOMATISMOS",
            "DISEÑO Y PROCESAMIENTO MECÁNICO",
            "INSTALACIONES Y APLICACIONES DE LA ENERGÍA",
        ],
    ),
    (
        6,
        &[
            "LITERATURA",
            "INGLÉS",
            "EDUCACIÓN FÍSICA",
            "FILOSOFÍA",
            "ARTE",
            "MATEMÁTICA APLICADA",
            "TERMODINÁMICA Y MÁQUINAS TÉRMICAS",
            "ELECTROTECNIA",
            "SISTEMAS MECÁNICOS",
            "DERECHOS DEL TRABAJO",
            "LABORATORIO DE MEDICIONES ELÉCTRICAS",
            "MÁQUINAS ELÉCTRICAS Y AUTOMATISMOS",
            "DISEÑO Y PROCESAMIENTO MECÁNICO",
            "INSTALACIONES Y APLICACIONES DE LA ENERGÍA",
        ],
    ),
    (
        7,
        &[
            "PRÁCTICAS PROFESIONALIZANTES",
            "EMPRENDIMIENTOS PRODUCTIVOS Y DESARROLLO LOCAL",
            "ELECTRÓNICA INDUSTRIAL",
            "SEGURIDAD, HIGIENE Y PROTECCIÓN DEL MEDIO AMBIENTE",
            "MÁQUINAS ELÉCTRICAS",
            "SISTEMAS MECÁNICOS",
            "LABORATORIO DE METROLOGÍA Y CONTROL DE CALIDAD",
            "MANTENIMIENTO Y MONTAJE ELECTROMECÁNICO",
            "PROYECTO Y DISEÑO ELECTROMECÁNICO",
            "PROYECTO Y DISEÑO DE INSTALACIONES ELÉCTRICAS",
        ],
    ),
];

const SECOND_AND_THIRD_YEAR: &[&str] = &[
    "BIOLOGÍA",
    "CONSTRUCCIÓN DE CIUDADANÍA",
    "EDUCACIÓN ARTÍSTICA",
    "EDUCACIÓN FÍSICA",
    "FÍSICO QUÍMICA",
    "GEOGRAFÍA",
    "HISTORIA",
    "INGLÉS",
    "MATEMÁTICA",
    "PRÁCTICAS DEL LENGUAJE",
    "PROCEDIMIENTOS TÉCNICOS",
    "LENGUAJES TECNOLÓGICOS",
    "SISTEMAS TECNOLÓGICOS",
];

static BUILTIN: LazyLock<Arc<SubjectCatalog>> =
    LazyLock::new(|| Arc::new(SubjectCatalog::builtin()));

/// The built-in catalog, built once and shared.
pub fn shared_builtin() -> Arc<SubjectCatalog> {
    Arc::clone(&BUILTIN)
}

#[derive(Debug, Error)]
pub enum CatalogError {
    /// A rewrite rule pattern is not a valid regular expression.
    #[error("invalid rewrite pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to read catalog file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse catalog file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct RewriteRule {
    pattern: Regex,
    canonical: String,
}

impl RewriteRule {
    pub fn new(pattern: &str, canonical: &str) -> Result<Self, CatalogError> {
        let compiled = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| CatalogError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        Ok(Self {
            pattern: compiled,
            canonical: clean_label(canonical),
        })
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

#[derive(Debug, Clone)]
pub struct EquivalenceEntry {
    pub principal: String,
    pub variants: Vec<String>,
}

/// A full word and the abbreviations that stand for it, kept folded.
#[derive(Debug, Clone)]
pub struct KeywordEntry {
    pub word: String,
    pub abbreviations: Vec<String>,
}

/// On-disk shape of `catalog.json`. Every key is optional; present list keys
/// replace the built-in list and `cohortOrder` replaces only the years given.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CatalogFile {
    #[serde(default)]
    pub rewrite_rules: Option<Vec<RewriteRuleDef>>,
    #[serde(default)]
    pub equivalences: Option<Vec<EquivalenceDef>>,
    #[serde(default)]
    pub keywords: Option<Vec<KeywordDef>>,
    #[serde(default)]
    pub cohort_order: Option<BTreeMap<i32, Vec<String>>>,
    #[serde(default)]
    pub substring_min_len: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriteRuleDef {
    pub pattern: String,
    pub canonical: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquivalenceDef {
    pub principal: String,
    #[serde(default)]
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordDef {
    pub word: String,
    #[serde(default)]
    pub abbreviations: Vec<String>,
}

/// Read-only configuration for naming, matching and ordering subjects.
#[derive(Debug, Clone)]
pub struct SubjectCatalog {
    rewrite_rules: Vec<RewriteRule>,
    equivalences: Vec<EquivalenceEntry>,
    keywords: Vec<KeywordEntry>,
    cohort_order: BTreeMap<i32, Vec<String>>,
    substring_min_len: usize,
    // folded key -> canonical spelling
    spellings: HashMap<String, String>,
    // folded principal/variant -> indexes into `equivalences`
    equivalence_index: HashMap<String, Vec<usize>>,
}

impl SubjectCatalog {
    pub fn builtin() -> Self {
        let rewrite_rules: Vec<RewriteRule> = BUILTIN_REWRITE_RULES
            .iter()
            .filter_map(|(pattern, canonical)| match RewriteRule::new(pattern, canonical) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::error!(error = %e, "skipping built-in rewrite rule");
                    None
                }
            })
            .collect();
        let equivalences: Vec<EquivalenceEntry> = BUILTIN_EQUIVALENCES
            .iter()
            .map(|(principal, variants)| EquivalenceEntry {
                principal: principal.to_string(),
                variants: variants.iter().map(|v| v.to_string()).collect(),
            })
            .collect();
        let keywords: Vec<KeywordEntry> = BUILTIN_KEYWORDS
            .iter()
            .map(|(word, abbreviations)| keyword_entry(word, abbreviations.iter().copied()))
            .collect();
        let cohort_order: BTreeMap<i32, Vec<String>> = BUILTIN_COHORT_ORDER
            .iter()
            .map(|(year, names)| (*year, names.iter().map(|n| clean_label(n)).collect()))
            .collect();
        Self::assemble(
            rewrite_rules,
            equivalences,
            keywords,
            cohort_order,
            DEFAULT_SUBSTRING_MIN_LEN,
        )
    }

    /// Built-in catalog with the sections present in `file` replaced.
    pub fn with_overrides(file: CatalogFile) -> Result<Self, CatalogError> {
        let base = Self::builtin();

        let rewrite_rules = match file.rewrite_rules {
            Some(defs) => defs
                .iter()
                .map(|d| RewriteRule::new(&d.pattern, &d.canonical))
                .collect::<Result<Vec<_>, _>>()?,
            None => base.rewrite_rules,
        };
        let equivalences = match file.equivalences {
            Some(defs) => defs
                .into_iter()
                .map(|d| EquivalenceEntry {
                    principal: d.principal,
                    variants: d.variants,
                })
                .collect(),
            None => base.equivalences,
        };
        let keywords = match file.keywords {
            Some(defs) => defs
                .iter()
                .map(|d| keyword_entry(&d.word, d.abbreviations.iter().map(String::as_str)))
                .collect(),
            None => base.keywords,
        };
        let mut cohort_order = base.cohort_order;
        if let Some(years) = file.cohort_order {
            for (year, names) in years {
                cohort_order.insert(year, names.iter().map(|n| clean_label(n)).collect());
            }
        }
        let substring_min_len = file.substring_min_len.unwrap_or(base.substring_min_len);

        Ok(Self::assemble(
            rewrite_rules,
            equivalences,
            keywords,
            cohort_order,
            substring_min_len,
        ))
    }

    pub fn from_json_str(text: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(text)?;
        Self::with_overrides(file)
    }

    /// Loads `catalog.json` from a workspace. `Ok(None)` when the file is absent.
    pub fn load_workspace(workspace: &Path) -> Result<Option<Self>, CatalogError> {
        let path = workspace.join(CATALOG_FILE_NAME);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        Self::from_json_str(&text).map(Some)
    }

    fn assemble(
        rewrite_rules: Vec<RewriteRule>,
        equivalences: Vec<EquivalenceEntry>,
        keywords: Vec<KeywordEntry>,
        cohort_order: BTreeMap<i32, Vec<String>>,
        substring_min_len: usize,
    ) -> Self {
        let mut spellings: HashMap<String, String> = HashMap::new();
        let mut remember = |name: &str| {
            let cleaned = clean_label(name);
            if !cleaned.is_empty() {
                spellings.entry(fold_accents(&cleaned)).or_insert(cleaned);
            }
        };
        for rule in &rewrite_rules {
            remember(rule.canonical());
        }
        for entry in &equivalences {
            remember(&entry.principal);
        }
        for names in cohort_order.values() {
            for name in names {
                remember(name);
            }
        }

        let mut equivalence_index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, entry) in equivalences.iter().enumerate() {
            for name in std::iter::once(&entry.principal).chain(entry.variants.iter()) {
                let key = fold_accents(&clean_label(name));
                if key.is_empty() {
                    continue;
                }
                let slot = equivalence_index.entry(key).or_default();
                if !slot.contains(&i) {
                    slot.push(i);
                }
            }
        }

        Self {
            rewrite_rules,
            equivalences,
            keywords,
            cohort_order,
            substring_min_len,
            spellings,
            equivalence_index,
        }
    }

    /// Canonical output of the first rewrite rule matching a folded label.
    pub fn rewrite(&self, folded: &str) -> Option<&str> {
        self.rewrite_rules
            .iter()
            .find(|r| r.pattern.is_match(folded))
            .map(|r| r.canonical())
    }

    pub fn canonical_spelling(&self, folded: &str) -> Option<&str> {
        self.spellings.get(folded).map(String::as_str)
    }

    /// Equivalence entries that list `folded` as principal or variant.
    pub fn equivalence_entries(&self, folded: &str) -> &[usize] {
        self.equivalence_index
            .get(folded)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn equivalence(&self, index: usize) -> Option<&EquivalenceEntry> {
        self.equivalences.get(index)
    }

    pub fn keywords(&self) -> &[KeywordEntry] {
        &self.keywords
    }

    /// Display order for a cohort year, empty when the year has none.
    pub fn cohort_order(&self, cohort_year: i32) -> &[String] {
        self.cohort_order
            .get(&cohort_year)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn cohort_years(&self) -> impl Iterator<Item = i32> + '_ {
        self.cohort_order.keys().copied()
    }

    /// Every principal name in the equivalence table.
    pub fn principal_names(&self) -> Vec<String> {
        self.equivalences
            .iter()
            .map(|e| clean_label(&e.principal))
            .collect()
    }

    pub fn substring_min_len(&self) -> usize {
        self.substring_min_len
    }

    pub fn rewrite_rule_count(&self) -> usize {
        self.rewrite_rules.len()
    }
}

impl Default for SubjectCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn keyword_entry<'a>(word: &str, abbreviations: impl Iterator<Item = &'a str>) -> KeywordEntry {
    KeywordEntry {
        word: fold_accents(&clean_label(word)),
        abbreviations: abbreviations
            .map(|a| fold_accents(&clean_label(a)))
            .filter(|a| !a.is_empty())
            .collect(),
    }
}
