use util::EnumFromStr;
use util_derive::EnumFromStr;

/// Every assembler directive. Parsing from source text is case-insensitive.
#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumFromStr)]
pub enum Directive {
    Include,
    Incbin,
    Org,
    Db,
    Dw,
    Ds,
    Equ,
    Macro,
    Endm,
    If,
    Ifdef,
    Ifndef,
    Endif,
    Pushd,
    Popd,
    Align,
    Assert,
    Pushorg,
    Poporg,
    Repeat,
    Endr,
    End,
    Cpu,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_str_is_case_insensitive() {
        assert_eq!(Directive::from_str("ORG").unwrap(), Directive::Org);
        assert_eq!(Directive::from_str("endif").unwrap(), Directive::Endif);
        assert!(Directive::from_str("nope").is_err());
    }
}
