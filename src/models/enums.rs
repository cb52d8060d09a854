use serde::{Deserialize, Serialize};

use super::InvalidEnumValue;

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// The string form doubles as the serde representation.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidEnumValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(InvalidEnumValue {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(ParameterStatus {
    Below => "below",
    Normal => "normal",
    Above => "above",
    Indeterminate => "indeterminate",
});

str_enum!(Sex {
    Male => "masculino",
    Female => "feminino",
});

str_enum!(ClinicalCategory {
    Hematology => "hematologia",
    Biochemistry => "bioquimica",
    RenalFunction => "funcao_renal",
    HepaticFunction => "funcao_hepatica",
    Hormonal => "hormonal",
    Electrolytes => "eletrolitos",
    Vitamins => "vitaminas",
    Unclassified => "outros",
});

str_enum!(RangeSource {
    Document => "document",
    Dictionary => "dictionary",
    Absent => "none",
});

str_enum!(UnitResolution {
    Canonical => "canonical",
    Converted => "converted",
    Assumed => "assumed",
    Unrecognized => "unrecognized",
    Conflict => "conflict",
});

str_enum!(LineSource {
    Table => "table",
    Geometry => "geometry",
    Text => "text",
});

impl ParameterStatus {
    /// Anything outside the reference range.
    pub fn is_altered(&self) -> bool {
        matches!(self, Self::Below | Self::Above)
    }
}

impl Sex {
    /// Lenient parse of a sex value as printed on a report.
    /// Only the first word counts: "Feminino (F)" is female.
    pub fn parse_label(raw: &str) -> Option<Self> {
        let word: String = raw
            .trim()
            .chars()
            .take_while(|c| c.is_alphabetic())
            .flat_map(char::to_lowercase)
            .collect();
        match word.as_str() {
            "masculino" | "m" | "male" | "homem" | "masc" | "hombre" => Some(Self::Male),
            "feminino" | "f" | "female" | "mulher" | "fem" | "femenino" | "mujer" => {
                Some(Self::Female)
            }
            _ => None,
        }
    }
}
