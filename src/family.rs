//! Code families searched independently: diagnoses (ICD-10) and procedures (CPT-4).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeFamily {
    Diagnosis,
    Procedure,
}

impl CodeFamily {
    pub const ALL: [CodeFamily; 2] = [CodeFamily::Diagnosis, CodeFamily::Procedure];

    /// Stem shared by every artifact of this family.
    fn stem(self) -> &'static str {
        match self {
            CodeFamily::Diagnosis => "icd10",
            CodeFamily::Procedure => "cpt4",
        }
    }

    /// Code -> description map, JSON object.
    pub fn catalog_file(self) -> String {
        format!("{}.json", self.stem())
    }

    /// Ordered code list aligned with the embedding matrix rows.
    pub fn codes_file(self) -> String {
        format!("{}_codes.json", self.stem())
    }

    /// Binary embedding matrix.
    pub fn matrix_file(self) -> String {
        format!("{}_embeddings.bin", self.stem())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CodeFamily::Diagnosis => "diagnosis",
            CodeFamily::Procedure => "procedure",
        }
    }
}

impl fmt::Display for CodeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "diagnosis" | "icd" | "icd10" | "icd-10" => Ok(CodeFamily::Diagnosis),
            "procedure" | "cpt" | "cpt4" | "cpt-4" => Ok(CodeFamily::Procedure),
            other => Err(format!(
                "unknown code family '{other}' (expected diagnosis or procedure)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("ICD10".parse::<CodeFamily>().unwrap(), CodeFamily::Diagnosis);
        assert_eq!("diagnosis".parse::<CodeFamily>().unwrap(), CodeFamily::Diagnosis);
        assert_eq!(" cpt ".parse::<CodeFamily>().unwrap(), CodeFamily::Procedure);
        assert!("lab".parse::<CodeFamily>().is_err());
    }

    #[test]
    fn test_artifact_names() {
        assert_eq!(CodeFamily::Diagnosis.catalog_file(), "icd10.json");
        assert_eq!(CodeFamily::Diagnosis.codes_file(), "icd10_codes.json");
        assert_eq!(CodeFamily::Procedure.matrix_file(), "cpt4_embeddings.bin");
    }
}
