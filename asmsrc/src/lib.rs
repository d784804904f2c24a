//! Drives an Intel 8080/8085 source file through the two-pass assembly
//! pipeline described in `spec.md`: parsing and on-demand argument parsing
//! (`parser`), the line model and its edit API (`line`), scoped symbol
//! storage (`varspace`), the expression language (`expr`), macro expansion
//! (`macros`), the `include`/`incbin` directory stack (`dirstack`), the
//! `pushorg`/`poporg` origin stack (`orgstack`), and the pass driver itself
//! (`driver`), which ties all of the above into `assemble`.

pub mod dirstack;
pub mod driver;
pub mod error;
pub mod expr;
pub mod line;
pub mod macros;
pub mod orgstack;
pub mod parser;
pub mod varspace;

pub use driver::{assemble, assemble_with_cpu, AssembleFailure, Assembled, AssemblerState};
pub use error::{AssembleError, Warning};
pub use line::{Argument, Instr, Line, LineId, LineInfo, LineList, ParsedArg};
