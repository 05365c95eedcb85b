use serde::Serialize;
use std::error::Error;
use std::fmt;

/// One captured call-site location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub func: String,
    pub source: String,
    pub line: u32,
}

impl StackFrame {
    pub fn new(func: impl Into<String>, source: impl Into<String>, line: u32) -> Self {
        StackFrame {
            func: func.into(),
            source: source.into(),
            line,
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.func, self.source, self.line)
    }
}

/// Error value annotated with the call stack at the point it was created.
///
/// Attach one at the boundary where your code receives an error from code
/// outside the project, then pass it along unchanged; the stack should lead
/// to the line that talked to the outside code. Logging it through
/// [`report`](crate::recover::report) or `tracing::error!(error = &err as &dyn Error)`
/// puts the frames under the record's `stack` key.
pub struct StackError {
    context: String,
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
    frames: Vec<StackFrame>,
}

impl StackError {
    /// New error with `msg`, capturing the current stack.
    pub fn new(msg: impl Into<String>) -> Self {
        StackError {
            context: msg.into(),
            source: None,
            frames: capture_frames(),
        }
    }

    /// Annotate `err` with the current stack, keeping its message.
    pub fn with_stack<E>(err: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        let err = err.into();
        StackError {
            context: err.to_string(),
            source: Some(err),
            frames: capture_frames(),
        }
    }

    /// Annotate `err` with the current stack and a context message.
    /// Displays as `context: err`.
    pub fn wrap<E>(err: E, context: impl Into<String>) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        let mut wrapped = Self::with_stack(err);
        wrapped.context = format!("{}: {}", context.into(), wrapped.context);
        wrapped
    }

    /// Build from frames captured elsewhere, e.g. inside a panic hook.
    pub fn from_frames(msg: impl Into<String>, frames: Vec<StackFrame>) -> Self {
        StackError {
            context: msg.into(),
            source: None,
            frames,
        }
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// Borrow as a `'static` trait object, the form `tracing` records errors in.
    pub fn as_dyn(&self) -> &(dyn Error + 'static) {
        self
    }

    /// First `StackError` in the source chain of `err`, including `err` itself.
    pub fn find_in<'a>(err: &'a (dyn Error + 'static)) -> Option<&'a StackError> {
        std::iter::successors(Some(err), |&e| e.source()).find_map(|e| e.downcast_ref::<StackError>())
    }
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.context)
    }
}

impl fmt::Debug for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.context)?;
        for frame in &self.frames {
            writeln!(f, "    at {frame}")?;
        }
        Ok(())
    }
}

impl Error for StackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn Error + 'static))
    }
}

/// Attach a stack to the error side of a `Result` at a project boundary.
pub trait ResultExt<T> {
    fn with_stack(self) -> Result<T, StackError>;
    fn wrap_err(self, context: impl Into<String>) -> Result<T, StackError>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<Box<dyn Error + Send + Sync + 'static>>,
{
    fn with_stack(self) -> Result<T, StackError> {
        self.map_err(StackError::with_stack)
    }

    fn wrap_err(self, context: impl Into<String>) -> Result<T, StackError> {
        self.map_err(|e| StackError::wrap(e, context))
    }
}

/// Prefixes of frames that belong to the capture machinery rather than to
/// the code being annotated.
const INTERNAL_PREFIXES: &[&str] = &[
    "backtrace::",
    "std::",
    "core::",
    "alloc::",
    "<std::",
    "<core::",
    "<alloc::",
    "rust_begin_unwind",
    "__rust",
    "tracing_logutil::stack::",
    "tracing_logutil::recover::",
    "<tracing_logutil::recover::",
];

fn is_internal(frame: &StackFrame) -> bool {
    INTERNAL_PREFIXES.iter().any(|p| frame.func.starts_with(p))
}

/// Capture the current stack, innermost first, without the leading frames
/// of the capture and panic machinery.
#[inline(never)]
pub(crate) fn capture_frames() -> Vec<StackFrame> {
    let bt = backtrace::Backtrace::new();
    let mut frames = Vec::new();
    for frame in bt.frames() {
        for symbol in frame.symbols() {
            let func = symbol
                .name()
                .map(|n| format!("{n:#}"))
                .unwrap_or_else(|| "<unknown>".to_string());
            let source = symbol
                .filename()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<unknown>".to_string());
            frames.push(StackFrame::new(func, source, symbol.lineno().unwrap_or(0)));
        }
    }
    trim_leading(frames)
}

fn trim_leading(frames: Vec<StackFrame>) -> Vec<StackFrame> {
    let skip = frames.iter().take_while(|f| is_internal(f)).count();
    if skip == frames.len() {
        return frames;
    }
    frames.into_iter().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn wrap_prefixes_context_and_keeps_source() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "config.toml");
        let err = StackError::wrap(io_err, "loading config");
        assert_eq!(err.to_string(), "loading config: config.toml");
        assert!(err.source().is_some());
    }

    #[test]
    fn captures_a_non_empty_stack() {
        let err = StackError::new("testing");
        assert!(!err.frames().is_empty());
    }

    #[test]
    fn trims_only_leading_internal_frames() {
        let frames = vec![
            StackFrame::new("backtrace::capture::Backtrace::new", "bt.rs", 1),
            StackFrame::new("tracing_logutil::stack::capture_frames", "stack.rs", 2),
            StackFrame::new("app::load", "src/app.rs", 10),
            StackFrame::new("std::rt::lang_start", "rt.rs", 3),
        ];
        let trimmed = trim_leading(frames);
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[0].func, "app::load");
    }

    #[test]
    fn finds_stack_error_in_source_chain() {
        #[derive(Debug)]
        struct Outer(StackError);
        impl fmt::Display for Outer {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("outer")
            }
        }
        impl Error for Outer {
            fn source(&self) -> Option<&(dyn Error + 'static)> {
                Some(&self.0)
            }
        }

        let frames = vec![StackFrame::new("a", "a.rs", 1)];
        let outer = Outer(StackError::from_frames("inner", frames));
        let found = StackError::find_in(&outer).unwrap();
        assert_eq!(found.to_string(), "inner");
        assert_eq!(found.frames().len(), 1);
    }

    #[test]
    fn find_in_walks_several_sources() {
        #[derive(Debug)]
        struct Context(&'static str, Box<dyn Error + Send + Sync>);
        impl fmt::Display for Context {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.0)
            }
        }
        impl Error for Context {
            fn source(&self) -> Option<&(dyn Error + 'static)> {
                Some(self.1.as_ref())
            }
        }

        let inner = StackError::from_frames("disk full", vec![StackFrame::new("a", "a.rs", 1)]);
        let chain = Context("saving", Box::new(Context("writing", Box::new(inner))));
        let found = StackError::find_in(&chain).unwrap();
        assert_eq!(found.to_string(), "disk full");

        let plain = Context("saving", Box::new(io::Error::other("no stack here")));
        assert!(StackError::find_in(&plain).is_none());
    }

    #[test]
    fn result_ext_attaches_stack() {
        let res: Result<(), io::Error> = Err(io::Error::other("refused"));
        let err = res.wrap_err("dialing upstream").unwrap_err();
        assert_eq!(err.to_string(), "dialing upstream: refused");
    }
}
