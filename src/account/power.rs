/// Account power levels
use crate::error::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};

/// Ordered privilege tier attached to an account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Power {
    /// Account not activated yet
    #[default]
    None,
    /// Activated account
    Normal,
    /// Paid or donated
    Premium,
    /// Can ban and warn accounts
    Mod,
    /// Can read private information (email) but not modify it
    Bot,
    /// Can make mods and edit account information
    Admin,
    /// Can make admins
    Owner,
    /// Everything, including storage internals
    Programmer,
}

impl Power {
    pub const ALL: [Power; 8] = [
        Power::None,
        Power::Normal,
        Power::Premium,
        Power::Mod,
        Power::Bot,
        Power::Admin,
        Power::Owner,
        Power::Programmer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Power::None => "none",
            Power::Normal => "normal",
            Power::Premium => "premium",
            Power::Mod => "mod",
            Power::Bot => "bot",
            Power::Admin => "admin",
            Power::Owner => "owner",
            Power::Programmer => "programmer",
        }
    }

    /// Integer stored in the `power` column and carried in tokens
    pub fn level(&self) -> i32 {
        *self as i32
    }

    pub fn from_level(level: i32) -> AuthResult<Self> {
        usize::try_from(level)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .ok_or_else(|| AuthError::Unknown(format!("Invalid power level: {}", level)))
    }

    /// Check if this level may perform actions requiring another
    pub fn can_act_as(&self, required: Power) -> bool {
        self >= &required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_hierarchy() {
        assert!(Power::Programmer > Power::Owner);
        assert!(Power::Owner > Power::Admin);
        assert!(Power::Admin > Power::Bot);
        assert!(Power::Bot > Power::Mod);
        assert!(Power::Mod > Power::Premium);
        assert!(Power::Premium > Power::Normal);
        assert!(Power::Normal > Power::None);

        assert!(Power::Admin.can_act_as(Power::Mod));
        assert!(!Power::Mod.can_act_as(Power::Admin));
    }

    #[test]
    fn test_level_round_trip() {
        for power in Power::ALL {
            assert_eq!(Power::from_level(power.level()).unwrap(), power);
        }
        assert_eq!(Power::Normal.level(), 1);
        assert!(Power::from_level(8).is_err());
        assert!(Power::from_level(-1).is_err());
    }
}
