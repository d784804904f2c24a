use std::fmt;

/// A value-truncation warning, collected during the second pass and printed
/// by the CLI after a successful assembly (`spec.md` §7's "Warning" severity).
#[derive(Clone, Debug)]
pub struct Warning {
    pub file: String,
    pub line: u32,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: line {}: {}", self.file, self.line, self.message)
    }
}

/// A user-facing assembly error, reported on the offending source line
/// (`spec.md` §7's "User-facing assembly error" severity).
#[derive(Clone, Debug)]
pub struct AssembleError {
    pub file: String,
    pub line: u32,
    pub message: String,
}

impl AssembleError {
    pub fn new(file: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        AssembleError {
            file: file.into(),
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: line {}: {}", self.file, self.line, self.message)
    }
}

impl std::error::Error for AssembleError {}

pub type Result<T> = std::result::Result<T, AssembleError>;

/// Abort on an impossible internal state (`spec.md` §7's "Fatal" severity):
/// `file:line:function:` prefix on stderr, then exit 255. Reserved for
/// conditions the driver itself guarantees can't happen in normal use
/// (an `endm` reached outside macro collection, an org-stack underflow) —
/// never for a condition the user's source can trigger.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        eprintln!(
            "{}:{}:{}: fatal error: {}",
            file!(),
            line!(),
            {
                fn f() {}
                fn type_name_of<T>(_: T) -> &'static str {
                    std::any::type_name::<T>()
                }
                let name = type_name_of(f);
                &name[..name.len() - 3]
            },
            format!($($arg)*)
        );
        std::process::exit(255)
    }};
}
