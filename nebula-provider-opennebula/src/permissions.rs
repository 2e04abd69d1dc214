//! Permission codec
//!
//! Converts between the three-digit Unix-style mode used in configuration
//! (for example `"640"`) and OpenNebula's nine permission flags. Each digit is
//! `use * 4 + manage * 2 + admin`, in owner, group, other order.

use std::fmt;
use std::str::FromStr;

use crate::error::OneError;

/// The nine OpenNebula permission flags of an object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Permissions {
    pub owner_use: bool,
    pub owner_manage: bool,
    pub owner_admin: bool,
    pub group_use: bool,
    pub group_manage: bool,
    pub group_admin: bool,
    pub other_use: bool,
    pub other_manage: bool,
    pub other_admin: bool,
}

/// Use, manage and admin flags encoded by one digit
fn split_digit(digit: u8) -> (bool, bool, bool) {
    (digit / 4 == 1, (digit % 4) / 2 == 1, digit % 2 == 1)
}

fn join_digit(use_: bool, manage: bool, admin: bool) -> u8 {
    u8::from(use_) * 4 + u8::from(manage) * 2 + u8::from(admin)
}

impl Permissions {
    /// Parse a mode string such as `"742"`
    pub fn parse(s: &str) -> Result<Self, OneError> {
        let bytes = s.as_bytes();
        if bytes.len() != 3 {
            return Err(OneError::validation(format!(
                "permissions must be exactly 3 digits, got '{}'",
                s
            )));
        }

        let mut digits = [0u8; 3];
        for (slot, byte) in digits.iter_mut().zip(bytes) {
            if !(b'0'..=b'7').contains(byte) {
                return Err(OneError::validation(format!(
                    "permission digits must be between 0 and 7, got '{}'",
                    s
                )));
            }
            *slot = byte - b'0';
        }

        let (owner_use, owner_manage, owner_admin) = split_digit(digits[0]);
        let (group_use, group_manage, group_admin) = split_digit(digits[1]);
        let (other_use, other_manage, other_admin) = split_digit(digits[2]);

        Ok(Self {
            owner_use,
            owner_manage,
            owner_admin,
            group_use,
            group_manage,
            group_admin,
            other_use,
            other_manage,
            other_admin,
        })
    }

    /// Render as a mode string, the inverse of [`Permissions::parse`]
    pub fn format(&self) -> String {
        format!(
            "{}{}{}",
            join_digit(self.owner_use, self.owner_manage, self.owner_admin),
            join_digit(self.group_use, self.group_manage, self.group_admin),
            join_digit(self.other_use, self.other_manage, self.other_admin),
        )
    }

    /// Flags in the argument order of `one.vm.chmod`
    pub fn chmod_args(&self) -> [i32; 9] {
        [
            self.owner_use,
            self.owner_manage,
            self.owner_admin,
            self.group_use,
            self.group_manage,
            self.group_admin,
            self.other_use,
            self.other_manage,
            self.other_admin,
        ]
        .map(i32::from)
    }
}

impl FromStr for Permissions {
    type Err = OneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}
