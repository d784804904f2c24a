use util::EnumFromStr;
use util_derive::EnumFromStr;

/// A single 8-bit register, encoded 0..=7 exactly as the opcode bytes expect
/// (`M` denotes memory-indirect through `HL` and shares encoding slot 6).
#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumFromStr)]
pub enum Register {
    B,
    C,
    D,
    E,
    H,
    L,
    M,
    A,
}

impl Register {
    pub fn encoding(self) -> u8 {
        self as u8
    }
}

/// A register pair, encoded 0..=3. `Psw` and `Sp` share encoding slot 3 —
/// which mnemonic is valid in a given position is enforced by the opcode
/// table, not by this type.
#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumFromStr)]
pub enum RegisterPair {
    B,
    D,
    H,
    Sp,
    Psw,
}

impl RegisterPair {
    pub fn encoding(self) -> u8 {
        match self {
            RegisterPair::B => 0,
            RegisterPair::D => 1,
            RegisterPair::H => 2,
            RegisterPair::Sp | RegisterPair::Psw => 3,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn register_encodings_match_table_order() {
        assert_eq!(Register::B.encoding(), 0);
        assert_eq!(Register::M.encoding(), 6);
        assert_eq!(Register::A.encoding(), 7);
    }

    #[test]
    fn register_pair_psw_aliases_sp_encoding() {
        assert_eq!(RegisterPair::Sp.encoding(), RegisterPair::Psw.encoding());
    }

    #[test]
    fn from_str_is_case_insensitive() {
        assert_eq!(Register::from_str("a").unwrap(), Register::A);
        assert_eq!(Register::from_str("H").unwrap(), Register::H);
        assert!(Register::from_str("x").is_err());
    }
}
