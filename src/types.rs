use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Closed string enums stored as TEXT columns. Generates `as_str`, `ALL`,
/// `Display` and a `FromStr` that rejects unknown values.
macro_rules! text_enum {
    ($name:ident, $what:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(concat!("invalid ", $what, ": {}"), other)),
                }
            }
        }
    };
}

text_enum!(Role, "role" {
    Admin => "admin",
    Director => "director",
    ChiefTechnologist => "chief_technologist",
    CastingOperator => "casting_operator",
    CuttingOperator => "cutting_operator",
    AutoclaveOperator => "autoclave_operator",
    Employee => "employee",
});

text_enum!(BatchType, "batch type" {
    Casting => "casting",
    Cutting => "cutting",
    Autoclave => "autoclave",
});

text_enum!(BatchStatus, "batch status" {
    Active => "active",
    Completed => "completed",
    Cancelled => "cancelled",
    Inactive => "inactive",
});

text_enum!(Shift, "shift" {
    Day => "day",
    Night => "night",
});

text_enum!(EquipmentStatus, "equipment status" {
    Operational => "operational",
    Maintenance => "maintenance",
    Broken => "broken",
});

impl Role {
    /// Admin, director and chief technologist see and edit everyone's records.
    pub fn is_supervisor(&self) -> bool {
        matches!(
            self,
            Role::Admin | Role::Director | Role::ChiefTechnologist
        )
    }

    pub fn can_view_analytics(&self) -> bool {
        matches!(self, Role::Director | Role::ChiefTechnologist)
    }

    pub fn can_log_entries(&self) -> bool {
        matches!(self, Role::Employee | Role::CastingOperator)
    }

    /// Batch type run by an operator station role.
    pub fn operated_batch_type(&self) -> Option<BatchType> {
        match self {
            Role::CastingOperator => Some(BatchType::Casting),
            Role::CuttingOperator => Some(BatchType::Cutting),
            Role::AutoclaveOperator => Some(BatchType::Autoclave),
            _ => None,
        }
    }
}

impl Default for Shift {
    fn default() -> Self {
        Shift::Day
    }
}

/// Read a TEXT column into one of the enums above, surfacing bad data as a
/// conversion error rather than panicking.
pub fn column_enum<T: FromStr<Err = String>>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_text() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), *role);
        }
        assert!("operator".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_predicates() {
        assert!(Role::Admin.is_supervisor());
        assert!(Role::ChiefTechnologist.is_supervisor());
        assert!(!Role::CuttingOperator.is_supervisor());

        assert!(Role::Director.can_view_analytics());
        assert!(!Role::Admin.can_view_analytics());

        assert!(Role::Employee.can_log_entries());
        assert!(Role::CastingOperator.can_log_entries());
        assert!(!Role::AutoclaveOperator.can_log_entries());

        assert_eq!(
            Role::CuttingOperator.operated_batch_type(),
            Some(BatchType::Cutting)
        );
        assert_eq!(Role::Employee.operated_batch_type(), None);
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&Role::ChiefTechnologist).unwrap();
        assert_eq!(json, "\"chief_technologist\"");
        let status: BatchStatus = serde_json::from_str("\"inactive\"").unwrap();
        assert_eq!(status, BatchStatus::Inactive);
    }
}
