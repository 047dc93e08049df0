//! Exe driver (`spec.md` 4.5): detection evaluates an authored boolean
//! condition over variables; execution forwards to a per-machine or
//! per-user executor with a 0/100 progress pair emitted around the
//! process, not during it.

use crate::elevation::RestartState;
use crate::error::{EngineError, Result};
use crate::state::package::{CurrentState, DetectedState, ExecuteAction, Package, RequestState, RollbackAction};
use crate::variables::builtins::{HostInfo, KnownFolders};
use crate::variables::VariableStore;

use super::traits::{merge_restart, PackageDriver, PackageState, ProgressMessage, UiResponse};
use condition::evaluate;

/// Runs the real executable, per-machine or per-user depending on the
/// package's `per_machine` flag. Production code shells out via
/// `std::process::Command`; tests supply an in-memory fake, the same
/// seam style as [`super::native_installer::InstallerDatabase`].
pub trait ProcessExecutor: Send + Sync {
    /// Launches `path` with `arguments` and waits for it to exit.
    ///
    /// # Errors
    /// Any [`EngineError`] describing why the process could not be
    /// launched or waited on.
    fn run(&self, path: &str, arguments: &str, per_machine: bool) -> Result<ExecutionOutcome>;
}

/// What an exe package's execution reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Raw process exit code.
    pub exit_code: i32,
    /// Restart implication normalized by the executor.
    pub restart: RestartState,
}

/// Real [`ProcessExecutor`] backed by `std::process::Command`. Exit
/// code and stdout/stderr pass through unfiltered; `per_machine` is
/// accepted for interface symmetry with an elevated backend but this
/// implementation always launches in the calling process's own
/// context (an unprivileged controller cannot elevate a child itself
/// -- `per_machine` exe packages route through the companion process
/// instead, per `spec.md` 4.8).
#[derive(Default)]
pub struct StdProcessExecutor;

impl ProcessExecutor for StdProcessExecutor {
    fn run(&self, path: &str, arguments: &str, _per_machine: bool) -> Result<ExecutionOutcome> {
        let mut command = std::process::Command::new(path);
        if !arguments.is_empty() {
            command.args(shell_split(arguments));
        }
        let status = command.status().map_err(|source| EngineError::Io {
            action: format!("launching {path}"),
            source,
        })?;
        Ok(ExecutionOutcome {
            exit_code: status.code().unwrap_or(-1),
            restart: RestartState::None,
        })
    }
}

/// Splits an authored argument string on whitespace, honoring
/// double-quoted spans so a quoted path with spaces survives as one
/// argument. Not a full shell grammar -- the source engine's own exe
/// package arguments are a flat string passed to `CreateProcess`,
/// which does its own quote-aware splitting; this is that splitting
/// done in portable Rust.
fn shell_split(arguments: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in arguments.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// The exe [`PackageDriver`], bound to one package's install/uninstall
/// command lines and detect condition.
pub struct ExeDriver<'a> {
    executor: &'a dyn ProcessExecutor,
    folders: &'a dyn KnownFolders,
    host: &'a dyn HostInfo,
    install_path: String,
    install_arguments: String,
    uninstall_path: Option<String>,
    uninstall_arguments: String,
}

impl<'a> ExeDriver<'a> {
    /// Creates a driver bound to one exe package's launch
    /// configuration. `uninstall_path` is `None` for packages that do
    /// not support uninstall (mirrors `Package::uninstallable`).
    #[must_use]
    pub fn new(
        executor: &'a dyn ProcessExecutor,
        folders: &'a dyn KnownFolders,
        host: &'a dyn HostInfo,
        install_path: impl Into<String>,
        install_arguments: impl Into<String>,
        uninstall_path: Option<String>,
        uninstall_arguments: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            folders,
            host,
            install_path: install_path.into(),
            install_arguments: install_arguments.into(),
            uninstall_path,
            uninstall_arguments: uninstall_arguments.into(),
        }
    }
}

impl PackageDriver for ExeDriver<'_> {
    fn detect(&self, pkg: &Package, vars: &VariableStore) -> Result<PackageState> {
        let current = match &pkg.detect_condition {
            Some(condition) => {
                if evaluate(condition, vars, self.folders, self.host)? {
                    CurrentState::Present
                } else {
                    CurrentState::Absent
                }
            }
            None => CurrentState::Unknown,
        };
        Ok(PackageState { current, detected: DetectedState::None })
    }

    fn plan(&self, pkg: &Package, action: RequestState) -> Result<(ExecuteAction, RollbackAction)> {
        Ok(match (pkg.current_state, action) {
            (CurrentState::Absent | CurrentState::Unknown, RequestState::Present) => {
                (ExecuteAction::Install, RollbackAction::Uninstall)
            }
            (CurrentState::Present, RequestState::Absent | RequestState::ForceAbsent)
                if self.uninstall_path.is_some() =>
            {
                (ExecuteAction::Uninstall, RollbackAction::Install)
            }
            _ => (ExecuteAction::None, RollbackAction::None),
        })
    }

    fn execute(
        &self,
        action: &ExecuteAction,
        vars: &VariableStore,
        rollback: bool,
        _target: Option<&str>,
        msg_cb: &mut dyn FnMut(ProgressMessage) -> UiResponse,
        restart: &mut RestartState,
    ) -> Result<()> {
        let (path, arguments, per_machine) = match action {
            ExecuteAction::Install => (self.install_path.as_str(), self.install_arguments.as_str(), true),
            ExecuteAction::Uninstall => {
                let path = self.uninstall_path.as_deref().ok_or_else(|| EngineError::NotImplemented {
                    what: "uninstall command for this exe package".to_string(),
                })?;
                (path, self.uninstall_arguments.as_str(), true)
            }
            ExecuteAction::None => return Ok(()),
            other => {
                return Err(EngineError::NotImplemented {
                    what: format!("exe driver does not support {other:?}"),
                })
            }
        };
        let expanded_arguments = vars.get_formatted(arguments, self.folders, self.host)?;

        msg_cb(ProgressMessage::Tick { percentage: 0 });
        let outcome = self.executor.run(path, &expanded_arguments, per_machine);
        match outcome {
            Ok(result) => {
                merge_restart(restart, result.restart);
                msg_cb(ProgressMessage::Tick { percentage: 100 });
                if result.exit_code == 0 {
                    Ok(())
                } else {
                    Err(EngineError::ChildFailed { action: path.to_string(), code: result.exit_code })
                }
            }
            Err(e) if rollback => {
                if msg_cb(ProgressMessage::Error { code: -1, message: e.to_string() }) == UiResponse::Ignore {
                    Ok(())
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }
}

/// The tiny boolean-condition grammar exe packages author for
/// detection: `=`, `<>`, `<`, `<=`, `>`, `>=`, `AND`, `OR`, `NOT`,
/// parentheses, and bare variable names/string/numeric literals --
/// the comparison-expression shape MSI/Burn condition strings use,
/// scoped down to what `spec.md` 4.5 actually names.
mod condition {
    use crate::error::{EngineError, Result};
    use crate::variables::builtins::{HostInfo, KnownFolders};
    use crate::variables::VariableStore;
    use crate::variant::Variant;

    #[derive(Clone, Debug, PartialEq)]
    enum Token {
        Ident(String),
        Str(String),
        Num(i64),
        Eq,
        Ne,
        Lt,
        Le,
        Gt,
        Ge,
        And,
        Or,
        Not,
        LParen,
        RParen,
    }

    fn tokenize(input: &str) -> Result<Vec<Token>> {
        let chars: Vec<char> = input.chars().collect();
        let mut i = 0;
        let mut tokens = Vec::new();
        while i < chars.len() {
            let c = chars[i];
            match c {
                c if c.is_whitespace() => i += 1,
                '(' => {
                    tokens.push(Token::LParen);
                    i += 1;
                }
                ')' => {
                    tokens.push(Token::RParen);
                    i += 1;
                }
                '=' => {
                    tokens.push(Token::Eq);
                    i += 1;
                }
                '<' => {
                    if chars.get(i + 1) == Some(&'>') {
                        tokens.push(Token::Ne);
                        i += 2;
                    } else if chars.get(i + 1) == Some(&'=') {
                        tokens.push(Token::Le);
                        i += 2;
                    } else {
                        tokens.push(Token::Lt);
                        i += 1;
                    }
                }
                '>' => {
                    if chars.get(i + 1) == Some(&'=') {
                        tokens.push(Token::Ge);
                        i += 2;
                    } else {
                        tokens.push(Token::Gt);
                        i += 1;
                    }
                }
                '"' => {
                    let mut s = String::new();
                    i += 1;
                    while i < chars.len() && chars[i] != '"' {
                        s.push(chars[i]);
                        i += 1;
                    }
                    if i >= chars.len() {
                        return Err(EngineError::InvalidArgument {
                            detail: "unterminated string literal in condition".to_string(),
                        });
                    }
                    i += 1;
                    tokens.push(Token::Str(s));
                }
                c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                    let start = i;
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    let text: String = chars[start..i].iter().collect();
                    let value = text.parse::<i64>().map_err(|_| EngineError::InvalidArgument {
                        detail: format!("invalid numeric literal {text} in condition"),
                    })?;
                    tokens.push(Token::Num(value));
                }
                c if c.is_alphanumeric() || c == '_' || c == '.' => {
                    let start = i;
                    i += 1;
                    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                        i += 1;
                    }
                    let word: String = chars[start..i].iter().collect();
                    match word.to_ascii_uppercase().as_str() {
                        "AND" => tokens.push(Token::And),
                        "OR" => tokens.push(Token::Or),
                        "NOT" => tokens.push(Token::Not),
                        _ => tokens.push(Token::Ident(word)),
                    }
                }
                other => {
                    return Err(EngineError::InvalidArgument {
                        detail: format!("unexpected character {other:?} in condition"),
                    })
                }
            }
        }
        Ok(tokens)
    }

    /// Resolved value of one operand: either a variable reference
    /// (possibly absent) or a literal.
    enum Operand {
        Variable(Option<Variant>),
        Literal(Variant),
    }

    impl Operand {
        fn truthy(&self) -> bool {
            let variant = match self {
                Self::Variable(v) => v.as_ref(),
                Self::Literal(v) => Some(v),
            };
            match variant {
                None => false,
                Some(Variant::None) => false,
                Some(Variant::Numeric(n)) => *n != 0,
                Some(Variant::Version(v)) => *v != 0,
                Some(Variant::Str(s)) => !s.is_empty(),
            }
        }

        fn compare(&self, other: &Self) -> std::cmp::Ordering {
            let a = self.as_string();
            let b = other.as_string();
            if let (Ok(x), Ok(y)) = (a.parse::<i64>(), b.parse::<i64>()) {
                return x.cmp(&y);
            }
            a.cmp(&b)
        }

        fn as_string(&self) -> String {
            let variant = match self {
                Self::Variable(v) => v.as_ref(),
                Self::Literal(v) => Some(v),
            };
            match variant {
                None | Some(Variant::None) => String::new(),
                Some(Variant::Numeric(n)) => n.to_string(),
                Some(Variant::Version(v)) => v.to_string(),
                Some(Variant::Str(s)) => s.clone(),
            }
        }
    }

    struct Parser<'a> {
        tokens: &'a [Token],
        pos: usize,
        vars: &'a VariableStore,
        folders: &'a dyn KnownFolders,
        host: &'a dyn HostInfo,
    }

    impl<'a> Parser<'a> {
        fn peek(&self) -> Option<&Token> {
            self.tokens.get(self.pos)
        }

        fn advance(&mut self) -> Option<&Token> {
            let tok = self.tokens.get(self.pos);
            self.pos += 1;
            tok
        }

        fn parse_or(&mut self) -> Result<bool> {
            let mut value = self.parse_and()?;
            while matches!(self.peek(), Some(Token::Or)) {
                self.advance();
                let rhs = self.parse_and()?;
                value = value || rhs;
            }
            Ok(value)
        }

        fn parse_and(&mut self) -> Result<bool> {
            let mut value = self.parse_not()?;
            while matches!(self.peek(), Some(Token::And)) {
                self.advance();
                let rhs = self.parse_not()?;
                value = value && rhs;
            }
            Ok(value)
        }

        fn parse_not(&mut self) -> Result<bool> {
            if matches!(self.peek(), Some(Token::Not)) {
                self.advance();
                return Ok(!self.parse_not()?);
            }
            self.parse_comparison()
        }

        fn parse_comparison(&mut self) -> Result<bool> {
            let lhs = self.parse_operand()?;
            let op = match self.peek() {
                Some(Token::Eq) => Some(Token::Eq),
                Some(Token::Ne) => Some(Token::Ne),
                Some(Token::Lt) => Some(Token::Lt),
                Some(Token::Le) => Some(Token::Le),
                Some(Token::Gt) => Some(Token::Gt),
                Some(Token::Ge) => Some(Token::Ge),
                _ => None,
            };
            let Some(op) = op else {
                return Ok(lhs.truthy());
            };
            self.advance();
            let rhs = self.parse_operand()?;
            let ordering = lhs.compare(&rhs);
            Ok(match op {
                Token::Eq => ordering == std::cmp::Ordering::Equal,
                Token::Ne => ordering != std::cmp::Ordering::Equal,
                Token::Lt => ordering == std::cmp::Ordering::Less,
                Token::Le => ordering != std::cmp::Ordering::Greater,
                Token::Gt => ordering == std::cmp::Ordering::Greater,
                Token::Ge => ordering != std::cmp::Ordering::Less,
                _ => unreachable!("non-comparison token filtered above"),
            })
        }

        fn parse_operand(&mut self) -> Result<Operand> {
            match self.advance() {
                Some(Token::LParen) => {
                    let value = self.parse_or()?;
                    match self.advance() {
                        Some(Token::RParen) => Ok(Operand::Literal(Variant::Numeric(i64::from(value)))),
                        _ => Err(EngineError::InvalidArgument {
                            detail: "missing closing parenthesis in condition".to_string(),
                        }),
                    }
                }
                Some(Token::Ident(name)) => {
                    let value = self.vars.get_variant(name, self.folders, self.host).ok();
                    Ok(Operand::Variable(value))
                }
                Some(Token::Str(s)) => Ok(Operand::Literal(Variant::Str(s.clone()))),
                Some(Token::Num(n)) => Ok(Operand::Literal(Variant::Numeric(*n))),
                other => Err(EngineError::InvalidArgument {
                    detail: format!("unexpected token {other:?} in condition"),
                }),
            }
        }
    }

    /// Evaluates `expr` over `vars`, returning `true`/`false`.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidArgument`] for a malformed
    /// condition string.
    pub fn evaluate(expr: &str, vars: &VariableStore, folders: &dyn KnownFolders, host: &dyn HostInfo) -> Result<bool> {
        let tokens = tokenize(expr)?;
        let mut parser = Parser { tokens: &tokens, pos: 0, vars, folders, host };
        let result = parser.parse_or()?;
        if parser.pos != tokens.len() {
            return Err(EngineError::InvalidArgument {
                detail: format!("trailing tokens after position {} in condition {expr:?}", parser.pos),
            });
        }
        Ok(result)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::variables::builtins::test_support::{FakeHostInfo, FakeKnownFolders};

        #[test]
        fn bare_variable_is_truthy_when_nonzero() {
            let vars = VariableStore::new();
            vars.set_numeric("Installed", 1, false).unwrap();
            let folders = FakeKnownFolders::default();
            let host = FakeHostInfo::default();
            assert!(evaluate("Installed", &vars, &folders, &host).unwrap());
        }

        #[test]
        fn equality_comparison_against_string_literal() {
            let vars = VariableStore::new();
            vars.set_string("Edition", "Pro", false).unwrap();
            let folders = FakeKnownFolders::default();
            let host = FakeHostInfo::default();
            assert!(evaluate("Edition = \"Pro\"", &vars, &folders, &host).unwrap());
            assert!(!evaluate("Edition = \"Home\"", &vars, &folders, &host).unwrap());
        }

        #[test]
        fn numeric_ordering_comparisons() {
            let vars = VariableStore::new();
            vars.set_numeric("VersionNT", 602, false).unwrap();
            let folders = FakeKnownFolders::default();
            let host = FakeHostInfo::default();
            assert!(evaluate("VersionNT >= 601", &vars, &folders, &host).unwrap());
            assert!(!evaluate("VersionNT < 601", &vars, &folders, &host).unwrap());
        }

        #[test]
        fn and_or_not_and_parens_compose() {
            let vars = VariableStore::new();
            vars.set_numeric("A", 1, false).unwrap();
            vars.set_numeric("B", 0, false).unwrap();
            let folders = FakeKnownFolders::default();
            let host = FakeHostInfo::default();
            assert!(evaluate("A AND NOT B", &vars, &folders, &host).unwrap());
            assert!(evaluate("(A OR B) AND A", &vars, &folders, &host).unwrap());
            assert!(!evaluate("NOT A", &vars, &folders, &host).unwrap());
        }

        #[test]
        fn absent_variable_is_falsy() {
            let vars = VariableStore::new();
            let folders = FakeKnownFolders::default();
            let host = FakeHostInfo::default();
            assert!(!evaluate("NoSuchVariable", &vars, &folders, &host).unwrap());
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{ExecutionOutcome, ProcessExecutor, Result, RestartState};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeProcessExecutor {
        pub exit_code: i32,
        pub restart: RestartState,
        pub calls: Mutex<Vec<(String, String)>>,
    }

    impl ProcessExecutor for FakeProcessExecutor {
        fn run(&self, path: &str, arguments: &str, _per_machine: bool) -> Result<ExecutionOutcome> {
            self.calls.lock().unwrap().push((path.to_string(), arguments.to_string()));
            Ok(ExecutionOutcome { exit_code: self.exit_code, restart: self.restart })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeProcessExecutor;
    use super::*;
    use crate::state::package::{PackageId, PackageKind};
    use crate::variables::builtins::test_support::{FakeHostInfo, FakeKnownFolders};

    #[test]
    fn detect_evaluates_the_authored_condition() {
        let executor = FakeProcessExecutor::default();
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        let driver = ExeDriver::new(&executor, &folders, &host, "setup.exe", "", None, "");
        let vars = VariableStore::new();
        vars.set_numeric("HasRuntime", 1, false).unwrap();
        let mut pkg = Package::new(PackageId(1), PackageKind::Exe);
        pkg.detect_condition = Some("HasRuntime".to_string());
        let state = driver.detect(&pkg, &vars).unwrap();
        assert_eq!(state.current, CurrentState::Present);
    }

    #[test]
    fn plan_installs_when_absent_and_requested_present() {
        let executor = FakeProcessExecutor::default();
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        let driver = ExeDriver::new(&executor, &folders, &host, "setup.exe", "", None, "");
        let mut pkg = Package::new(PackageId(1), PackageKind::Exe);
        pkg.current_state = CurrentState::Absent;
        let (execute, rollback) = driver.plan(&pkg, RequestState::Present).unwrap();
        assert_eq!(execute, ExecuteAction::Install);
        assert_eq!(rollback, RollbackAction::Uninstall);
    }

    #[test]
    fn plan_does_not_uninstall_without_an_uninstall_command() {
        let executor = FakeProcessExecutor::default();
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        let driver = ExeDriver::new(&executor, &folders, &host, "setup.exe", "", None, "");
        let mut pkg = Package::new(PackageId(1), PackageKind::Exe);
        pkg.current_state = CurrentState::Present;
        let (execute, rollback) = driver.plan(&pkg, RequestState::Absent).unwrap();
        assert_eq!(execute, ExecuteAction::None);
        assert_eq!(rollback, RollbackAction::None);
    }

    #[test]
    fn execute_ticks_progress_around_the_process_not_during() {
        let executor = FakeProcessExecutor::default();
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        let driver = ExeDriver::new(&executor, &folders, &host, "setup.exe", "/quiet", None, "");
        let vars = VariableStore::new();
        let mut restart = RestartState::None;
        let mut ticks = Vec::new();
        driver
            .execute(
                &ExecuteAction::Install,
                &vars,
                false,
                None,
                &mut |msg| {
                    if let ProgressMessage::Tick { percentage } = msg {
                        ticks.push(percentage);
                    }
                    UiResponse::Ok
                },
                &mut restart,
            )
            .unwrap();
        assert_eq!(ticks, vec![0, 100]);
        assert_eq!(executor.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn execute_fails_without_an_uninstall_command() {
        let executor = FakeProcessExecutor::default();
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        let driver = ExeDriver::new(&executor, &folders, &host, "setup.exe", "", None, "");
        let vars = VariableStore::new();
        let mut restart = RestartState::None;
        let err = driver
            .execute(&ExecuteAction::Uninstall, &vars, false, None, &mut |_| UiResponse::Ok, &mut restart)
            .unwrap_err();
        assert!(matches!(err, EngineError::NotImplemented { .. }));
    }

    #[test]
    fn shell_split_honors_quoted_spans() {
        let parts = shell_split(r#"/S "C:\Program Files\app" --flag"#);
        assert_eq!(parts, vec!["/S", "C:\\Program Files\\app", "--flag"]);
    }

    #[test]
    fn std_process_executor_runs_a_real_command() {
        let executor = StdProcessExecutor;
        let outcome = executor.run("/bin/true", "", false).unwrap();
        assert_eq!(outcome.exit_code, 0);
    }

    #[test]
    fn std_process_executor_reports_nonzero_exit() {
        let executor = StdProcessExecutor;
        let outcome = executor.run("/bin/sh", "-c false", false).unwrap();
        assert_ne!(outcome.exit_code, 0);
    }
}
