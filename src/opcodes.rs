use util::EnumFromStr;
use util_derive::EnumFromStr;

/// Which CPU a source file is currently targeting, set by the `cpu` directive.
/// 8085 is the superset and is the default when no `cpu` directive appears.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CpuMode {
    Intel8080,
    Intel8085,
}

impl Default for CpuMode {
    fn default() -> Self {
        CpuMode::Intel8085
    }
}

/// How an opcode's argument(s) combine with its base byte to produce the
/// encoded instruction. Each variant corresponds to one of the historical
/// `ARG_*` byte-layout macros.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ArgShape {
    /// No arguments; the base byte is the whole instruction.
    None,
    /// One constant in `0..=7` (RST), encoded `base | v << 3`.
    ThreeConst,
    /// One register, encoded `base | r`.
    Register,
    /// One register, encoded `base | r << 3` (INR/DCR).
    RegisterShift3,
    /// One register pair, encoded `base | rp << 4`.
    RegisterPair,
    /// No register; a trailing `len`-byte little-endian immediate follows the base byte.
    Immediate(u8),
    /// A register (encoded `base | r << 3`) followed by a 1-byte immediate.
    RegImmediate8,
    /// A register pair (encoded `base | rp << 4`) followed by a 2-byte immediate.
    RegPairImmediate16,
    /// Two registers, destination then source, encoded `base | d << 3 | s` (MOV).
    TwoRegisters,
}

impl ArgShape {
    /// Total encoded length in bytes, where known without evaluating an expression.
    pub fn fixed_len(self) -> Option<u8> {
        match self {
            ArgShape::None
            | ArgShape::ThreeConst
            | ArgShape::Register
            | ArgShape::RegisterShift3
            | ArgShape::RegisterPair
            | ArgShape::TwoRegisters => Some(1),
            ArgShape::RegImmediate8 => Some(2),
            ArgShape::RegPairImmediate16 => Some(3),
            ArgShape::Immediate(len) => Some(1 + len),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct OpcodeDef {
    pub available_8080: bool,
    pub shape: ArgShape,
    pub base: u8,
}

macro_rules! opcode_table {
    ($( $variant:ident, $avail8080:expr, $shape:expr, $base:expr ; )*) => {
        /// One 8080/8085 mnemonic. Variant names are the mnemonic in
        /// PascalCase; parsing from source text is case-insensitive (see
        /// `EnumFromStr`).
        #[derive(Clone, Copy, PartialEq, Eq, Debug, EnumFromStr)]
        pub enum Opcode {
            $( $variant, )*
        }

        impl Opcode {
            pub fn def(self) -> OpcodeDef {
                match self {
                    $( Opcode::$variant => OpcodeDef {
                        available_8080: $avail8080,
                        shape: $shape,
                        base: $base,
                    }, )*
                }
            }
        }
    };
}

opcode_table! {
    Mov,  true,  ArgShape::TwoRegisters,        0x40;
    Mvi,  true,  ArgShape::RegImmediate8,       0x06;
    Lxi,  true,  ArgShape::RegPairImmediate16,  0x01;
    Lda,  true,  ArgShape::Immediate(2),        0x3a;
    Sta,  true,  ArgShape::Immediate(2),        0x32;
    Lhld, true,  ArgShape::Immediate(2),        0x2a;
    Shld, true,  ArgShape::Immediate(2),        0x22;
    Ldax, true,  ArgShape::RegisterPair,        0x0a;
    Stax, true,  ArgShape::RegisterPair,        0x02;
    Xchg, true,  ArgShape::None,                0xeb;
    Add,  true,  ArgShape::Register,            0x80;
    Adi,  true,  ArgShape::Immediate(1),        0xc6;
    Adc,  true,  ArgShape::Register,            0x88;
    Aci,  true,  ArgShape::Immediate(1),        0xce;
    Sub,  true,  ArgShape::Register,            0x90;
    Sui,  true,  ArgShape::Immediate(1),        0xd6;
    Sbb,  true,  ArgShape::Register,            0x98;
    Sbi,  true,  ArgShape::Immediate(1),        0xde;
    Inr,  true,  ArgShape::RegisterShift3,      0x04;
    Dcr,  true,  ArgShape::RegisterShift3,      0x05;
    Inx,  true,  ArgShape::RegisterPair,        0x03;
    Dcx,  true,  ArgShape::RegisterPair,        0x0b;
    Dad,  true,  ArgShape::RegisterPair,        0x09;
    Daa,  true,  ArgShape::None,                0x27;
    Ana,  true,  ArgShape::Register,            0xa0;
    Ani,  true,  ArgShape::Immediate(1),        0xe6;
    Ora,  true,  ArgShape::Register,            0xb0;
    Ori,  true,  ArgShape::Immediate(1),        0xf6;
    Xra,  true,  ArgShape::Register,            0xa8;
    Xri,  true,  ArgShape::Immediate(1),        0xee;
    Cmp,  true,  ArgShape::Register,            0xb8;
    Cpi,  true,  ArgShape::Immediate(1),        0xfe;
    Rlc,  true,  ArgShape::None,                0x07;
    Rrc,  true,  ArgShape::None,                0x0f;
    Ral,  true,  ArgShape::None,                0x17;
    Rar,  true,  ArgShape::None,                0x1f;
    Cma,  true,  ArgShape::None,                0x2f;
    Cmc,  true,  ArgShape::None,                0x3f;
    Stc,  true,  ArgShape::None,                0x37;
    Jmp,  true,  ArgShape::Immediate(2),        0xc3;
    Jnz,  true,  ArgShape::Immediate(2),        0xc2;
    Jz,   true,  ArgShape::Immediate(2),        0xca;
    Jnc,  true,  ArgShape::Immediate(2),        0xd2;
    Jc,   true,  ArgShape::Immediate(2),        0xda;
    Jpo,  true,  ArgShape::Immediate(2),        0xe2;
    Jpe,  true,  ArgShape::Immediate(2),        0xea;
    Jp,   true,  ArgShape::Immediate(2),        0xf2;
    Jm,   true,  ArgShape::Immediate(2),        0xfa;
    Call, true,  ArgShape::Immediate(2),        0xcd;
    Cnz,  true,  ArgShape::Immediate(2),        0xc4;
    Cz,   true,  ArgShape::Immediate(2),        0xcc;
    Cnc,  true,  ArgShape::Immediate(2),        0xd4;
    Cc,   true,  ArgShape::Immediate(2),        0xdc;
    Cpo,  true,  ArgShape::Immediate(2),        0xe4;
    Cpe,  true,  ArgShape::Immediate(2),        0xec;
    Cp,   true,  ArgShape::Immediate(2),        0xf4;
    Cm,   true,  ArgShape::Immediate(2),        0xfc;
    Ret,  true,  ArgShape::None,                0xc9;
    Rnz,  true,  ArgShape::None,                0xc0;
    Rz,   true,  ArgShape::None,                0xc8;
    Rnc,  true,  ArgShape::None,                0xd0;
    Rc,   true,  ArgShape::None,                0xd8;
    Rpo,  true,  ArgShape::None,                0xe0;
    Rpe,  true,  ArgShape::None,                0xe8;
    Rp,   true,  ArgShape::None,                0xf0;
    Rm,   true,  ArgShape::None,                0xf8;
    Rst,  true,  ArgShape::ThreeConst,          0xc7;
    Pchl, true,  ArgShape::None,                0xe9;
    Push, true,  ArgShape::RegisterPair,        0xc5;
    Pop,  true,  ArgShape::RegisterPair,        0xc1;
    Xthl, true,  ArgShape::None,                0xe3;
    Sphl, true,  ArgShape::None,                0xf9;
    In,   true,  ArgShape::Immediate(1),        0xdb;
    Out,  true,  ArgShape::Immediate(1),        0xd3;
    Ei,   true,  ArgShape::None,                0xfb;
    Di,   true,  ArgShape::None,                0xf3;
    Hlt,  true,  ArgShape::None,                0x76;
    Nop,  true,  ArgShape::None,                0x00;

    Dsub, false, ArgShape::None,                0x08;
    Arhl, false, ArgShape::None,                0x10;
    Rdel, false, ArgShape::None,                0x18;
    Rim,  false, ArgShape::None,                0x20;
    Ldhi, false, ArgShape::Immediate(1),        0x28;
    Sim,  false, ArgShape::None,                0x30;
    Ldsi, false, ArgShape::Immediate(1),        0x38;
    Rstv, false, ArgShape::None,                0xcb;
    Shlx, false, ArgShape::None,                0xd9;
    Jnk,  false, ArgShape::Immediate(2),        0xdd;
    Lhlx, false, ArgShape::None,                0xed;
    Jk,   false, ArgShape::Immediate(2),        0xfd;
}

impl Opcode {
    /// Whether this mnemonic is recognized while targeting the given CPU.
    pub fn available_in(self, mode: CpuMode) -> bool {
        match mode {
            CpuMode::Intel8085 => true,
            CpuMode::Intel8080 => self.def().available_8080,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nop_is_one_byte_zero() {
        assert_eq!(Opcode::Nop.def().base, 0x00);
        assert_eq!(Opcode::Nop.def().shape.fixed_len(), Some(1));
    }

    #[test]
    fn lxi_has_three_byte_shape() {
        assert_eq!(Opcode::Lxi.def().shape.fixed_len(), Some(3));
    }

    #[test]
    fn eight085_only_opcode_unavailable_in_8080_mode() {
        assert!(!Opcode::Rim.available_in(CpuMode::Intel8080));
        assert!(Opcode::Rim.available_in(CpuMode::Intel8085));
    }

    #[test]
    fn from_str_is_case_insensitive() {
        assert_eq!(Opcode::from_str("NOP").unwrap(), Opcode::Nop);
        assert_eq!(Opcode::from_str("mov").unwrap(), Opcode::Mov);
    }
}
