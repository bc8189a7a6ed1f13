use bitflags::bitflags;

bitflags! {
    /// Privilege bits a Domain grants an endpoint over a checkable. A
    /// `cluster::CheckResult` requires `COMMAND`; reading status over the
    /// API requires `READ`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct Privilege: u8 {
        const READ = 0b01;
        const COMMAND = 0b10;
    }
}

impl Privilege {
    /// No domains defined for a checkable means every endpoint has every
    /// privilege over it (spec §3, Domain).
    pub const ALL: Privilege = Privilege::READ.union(Privilege::COMMAND);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_contains_both_bits() {
        assert!(Privilege::ALL.contains(Privilege::READ));
        assert!(Privilege::ALL.contains(Privilege::COMMAND));
    }

    #[test]
    fn read_does_not_imply_command() {
        assert!(!Privilege::READ.contains(Privilege::COMMAND));
    }
}
