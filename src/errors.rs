use anyhow::Error;
use colored::*;
use std::borrow::Cow;
use std::fmt::Debug;
use std::fmt::Display;

/// A simple error type that lets the creator specify both the error
/// message and the error class name, mirroring how the engine's own
/// thrown errors carry a class name alongside a message.
#[derive(Debug)]
pub struct CustomError {
    class: &'static str,
    message: Cow<'static, str>,
}

impl CustomError {
    pub fn generic(message: impl Into<Cow<'static, str>>) -> Error {
        CustomError {
            class: "Error",
            message: message.into(),
        }
        .into()
    }

    pub fn new(class: &'static str, message: impl Into<Cow<'static, str>>) -> Error {
        CustomError {
            class,
            message: message.into(),
        }
        .into()
    }
}

impl std::error::Error for CustomError {}

impl Display for CustomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class.red().bold(), self.message)
    }
}

/// A captured, formatted representation of a pending V8 exception.
#[derive(PartialEq, Clone)]
pub struct JsError {
    pub message: String,
    pub resource_name: String,
    pub source_line: Option<String>,
    pub line_number: Option<i64>,
    pub start_column: Option<i64>,
    pub end_column: Option<i64>,
    pub stack: Option<String>,
}

impl JsError {
    /// Builds a `JsError` from a pending exception caught by a
    /// `TryCatch` scope. `prefix` is prepended to the message, used by
    /// the promise rejection reporter to mark "(in promise)" errors.
    pub fn from_v8_exception<'a>(
        scope: &'a mut v8::HandleScope,
        exception: v8::Local<'a, v8::Value>,
        prefix: Option<&str>,
    ) -> Self {
        let scope = &mut v8::HandleScope::new(scope);
        let message = v8::Exception::create_message(scope, exception);

        let mut exception_string = exception
            .to_string(scope)
            .map(|s| s.to_rust_string_lossy(scope))
            .unwrap_or_else(|| "<no message>".into());

        if let Some(prefix) = prefix {
            exception_string = format!("{prefix}{exception_string}");
        }

        let resource_name = message.get_script_resource_name(scope).map_or_else(
            || "(unknown)".into(),
            |s| s.to_string(scope).unwrap().to_rust_string_lossy(scope),
        );

        let source_line = message
            .get_source_line(scope)
            .map(|s| s.to_string(scope).unwrap().to_rust_string_lossy(scope));

        let line_number = message
            .get_line_number(scope)
            .and_then(|v| v.try_into().ok());

        let start_column = message.get_start_column().try_into().ok();
        let end_column = message.get_end_column().try_into().ok();

        let stack = exception.to_object(scope).and_then(|exception| {
            let key = v8::String::new(scope, "stack").unwrap();
            exception
                .get(scope, key.into())
                .and_then(|s| v8::Local::<v8::String>::try_from(s).ok())
                .map(|s| s.to_rust_string_lossy(scope))
        });

        JsError {
            message: exception_string,
            resource_name,
            source_line,
            line_number,
            start_column,
            end_column,
            stack,
        }
    }
}

impl std::error::Error for JsError {}

impl Display for JsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let line = self.line_number.unwrap_or_default();
        let column = self.start_column.unwrap_or_default();
        write!(
            f,
            "{} {} ({}:{}:{})",
            "Uncaught".red().bold(),
            self.message,
            self.resource_name,
            line,
            column
        )
    }
}

impl Debug for JsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} {}", "Uncaught".red().bold(), self.message)?;

        if let Some(source_line) = self.source_line.as_ref() {
            writeln!(f, "{source_line}")?;

            let start_column = self.start_column.unwrap_or_default();
            let end_column = self.end_column.unwrap_or_default();

            for _ in 0..start_column {
                write!(f, " ")?;
            }
            for _ in start_column..end_column {
                write!(f, "{}", "^".red())?;
            }
            writeln!(f)?;
        }

        if let Some(stack) = self.stack.as_ref() {
            write!(f, "{}", stack.dimmed())?;
        }

        Ok(())
    }
}

/// Stable ordinals returned by `check_init`. Order matters: these are
/// the ABI-visible error codes, not just a Rust-internal enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum InitError {
    Ok = 0,
    JsInit = 1,
    Intrinsics = 2,
    CustomIntrinsics = 3,
    SourceStdin = 4,
    SourceCompile = 5,
    BindingsCompile = 6,
    ImportWrapperCompile = 7,
    SourceLink = 8,
    SourceExec = 9,
    BindingsExec = 10,
    FnList = 11,
    MemBuffer = 12,
    ReallocFn = 13,
    MemBindings = 14,
    PromiseRejections = 15,
    ImportFn = 16,
    TypeParse = 17,
}

impl InitError {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Unwraps a result, printing a formatted diagnostic and aborting the
/// process on failure. Used at points the spec designates as abort
/// conditions (state-machine violations, call-phase exceptions).
pub fn abort_on_error<T>(context: &str, result: Result<T, Error>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            eprintln!("{context}: {e:?}");
            std::process::abort();
        }
    }
}
