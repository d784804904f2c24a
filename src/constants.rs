/// Size of the addressable target image; every `Line::location` is in `0..ADDRESS_SPACE`.
pub const ADDRESS_SPACE: u32 = 0x1_0000;

/// Depth limit on nested `include` (`spec.md` §5).
pub const MAX_INCLUDE_DEPTH: u32 = 1024;

/// Cumulative limit on macro (and `repeat`) expansions across one assembly job.
pub const MAX_MACRO_EXPANSIONS: u32 = 65536;

/// Depth of the expression evaluator's RPN value stack.
pub const EVAL_STACK_DEPTH: usize = 1024;
