//! Capacity limits shared by the group model and the rules parser

/// Maximum number of mounted hierarchies
pub const MAX_HIERARCHIES: usize = MAX_CONTROLLERS;

/// Maximum number of controllers co-mounted on one v1 hierarchy, and
/// maximum number of controllers named by one rule
pub const MAX_MNT_ELEMENTS: usize = 8;

/// Maximum number of controllers in one group
pub const MAX_CONTROLLERS: usize = 100;

/// Maximum number of parameters in one controller
pub const MAX_VALUES: usize = 100;

/// Maximum length of a path or file name, as glibc defines `FILENAME_MAX`
#[allow(clippy::cast_sign_loss)]
pub const FILENAME_MAX: usize = libc::PATH_MAX as usize;

/// Maximum length of a login name, as glibc defines `LOGIN_NAME_MAX`
pub const LOGIN_NAME_MAX: usize = 256;

/// Maximum length of one line of the rules file
pub const RULE_MAX_LINE: usize = FILENAME_MAX + LOGIN_NAME_MAX + MAX_CONTROLLERS + 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_line_limit() {
        assert_eq!(RULE_MAX_LINE, 4096 + 256 + 100 + 3);
    }
}
