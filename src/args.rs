//! Command-line switch table (`spec.md` 6): the engine's own argv
//! grammar, consumed after the host application's own arguments.
//!
//! `spec.md` 6 requires every switch to accept `-X`, `/X`, and `--X`
//! interchangeably, including the dotted `-burn.*` namespace and the
//! bare `NAME=VALUE` variable form. A declarative flag table has no
//! slash-prefixed or dash-count-indifferent mode, so every token still
//! needs a prefix-normalizing pass before a flag library could see it
//! -- and once that pass exists there is nothing left for one to add.
//! This module is a direct, hand-rolled walk of argv, mirroring the
//! source engine's own `ParseCommandLine` rather than a generated
//! parser.

use std::path::PathBuf;

use crate::error::{EngineError, Result};
use crate::logging::LogMode;

/// The top-level verb this invocation requests (`spec.md` 6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// `-?` / `-h` / `-help`.
    Help,
    /// Default action: install every package not already present.
    Install,
    /// `-uninstall`.
    Uninstall,
    /// `-repair`.
    Repair,
    /// `-modify`.
    Modify,
    /// `-layout [dir]`.
    Layout(Option<PathBuf>),
}

/// Presentation level requested by `-quiet`/`-passive`/neither.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Display {
    /// Full bootstrapper UI.
    Full,
    /// Progress-only UI, no prompts.
    Passive,
    /// No UI at all.
    None,
}

/// Restart policy, either explicitly requested or defaulted from
/// [`Display`] per `spec.md` 6's table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Restart {
    /// Ask the user before restarting (default for [`Display::Full`]).
    Prompt,
    /// Restart without asking (default for [`Display::Passive`]/[`Display::None`]).
    Always,
    /// Never restart, even if a package requires it.
    Never,
}

/// `-parent <name>` / `-parent:none`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParentRelation {
    /// This bundle was launched by a named parent bundle.
    Named(String),
    /// `-parent:none`: explicitly disclaim any parent relationship.
    None,
}

/// `-burn.related.{detect,upgrade,addon,patch,update}`: the relation
/// type this invocation declares to its caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelatedBundleType {
    /// `-burn.related.detect`.
    Detect,
    /// `-burn.related.upgrade`.
    Upgrade,
    /// `-burn.related.addon`.
    Addon,
    /// `-burn.related.patch`.
    Patch,
    /// `-burn.related.update`.
    Update,
}

/// The three tokens carried by `-elevated`/`-burn.embedded`: a pipe
/// name, a hex-encoded handshake secret, and the parent process id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipeConnection {
    /// Name of the pipe to connect to.
    pub pipe_name: String,
    /// Hex-encoded handshake secret, decoded with
    /// [`crate::pipe::decode_secret_hex`].
    pub secret_hex: String,
    /// Process id of the parent that spawned this invocation.
    pub parent_pid: u32,
}

/// Parsed command-line arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Args {
    /// The top-level verb.
    pub action: Action,
    /// Presentation level.
    pub display: Display,
    /// Explicitly requested restart policy, if any; see
    /// [`Args::effective_restart`] for the default.
    pub restart: Option<Restart>,
    /// `-l`/`-log`/`-log+` destination, if given.
    pub log_path: Option<PathBuf>,
    /// Overwrite vs. append, from `-log` vs `-log+`.
    pub log_mode: LogMode,
    /// `-noaupause`.
    pub noaupause: bool,
    /// `-keepaupaused`.
    pub keepaupaused: bool,
    /// `-disablesystemrestore`.
    pub disable_system_restore: bool,
    /// `-originalsource <path>`.
    pub original_source: Option<String>,
    /// `-parent <name>` / `-parent:none`.
    pub parent: Option<ParentRelation>,
    /// `-elevated <pipe> <secret> <pid>`: this process is the elevated
    /// companion, connecting back to the named controller.
    pub elevated: Option<PipeConnection>,
    /// `-burn.embedded <pipe> <secret> <pid>`: this process is an
    /// embedded (nested) bundle, connecting back to its host.
    pub embedded: Option<PipeConnection>,
    /// `-burn.clean.room=<path>`.
    pub clean_room: Option<PathBuf>,
    /// `-burn.related.*`.
    pub related: Option<RelatedBundleType>,
    /// `-burn.passthrough`.
    pub passthrough: bool,
    /// `-burn.disable.unelevate`.
    pub disable_unelevate: bool,
    /// `-burn.runonce`.
    pub runonce: bool,
    /// `-burn.ignoredependencies=<list>`, semicolon-split.
    pub ignore_dependencies: Vec<String>,
    /// `-burn.ancestors=<list>`, semicolon-split.
    pub ancestors: Vec<String>,
    /// `-burn.filehandle.attached=<n>`.
    pub filehandle_attached: Option<u64>,
    /// `-burn.filehandle.self=<n>`.
    pub filehandle_self: Option<u64>,
    /// Bare `NAME=VALUE` tokens, in the order they appeared.
    pub variables: Vec<(String, String)>,
    /// The original argument vector, space-joined, for
    /// `VariableStore::import_command_line`'s `raw_command_line`.
    pub raw_command_line: String,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            action: Action::Install,
            display: Display::Full,
            restart: None,
            log_path: None,
            log_mode: LogMode::Overwrite,
            noaupause: false,
            keepaupaused: false,
            disable_system_restore: false,
            original_source: None,
            parent: None,
            elevated: None,
            embedded: None,
            clean_room: None,
            related: None,
            passthrough: false,
            disable_unelevate: false,
            runonce: false,
            ignore_dependencies: Vec::new(),
            ancestors: Vec::new(),
            filehandle_attached: None,
            filehandle_self: None,
            variables: Vec::new(),
            raw_command_line: String::new(),
        }
    }
}

impl Args {
    /// The restart policy in effect: the explicit switch if one was
    /// given, else the default implied by [`Self::display`] per
    /// `spec.md` 6 (`-quiet`/`-passive` default to automatic restart;
    /// full UI defaults to prompting).
    #[must_use]
    pub fn effective_restart(&self) -> Restart {
        self.restart.unwrap_or(match self.display {
            Display::Full => Restart::Prompt,
            Display::Passive | Display::None => Restart::Always,
        })
    }

    /// Parses `argv` (NOT including the program name) into [`Args`].
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidArgument`] on an unrecognized
    /// switch, a multi-token switch missing one of its tokens, or a
    /// bare token that is neither a switch nor a `NAME=VALUE` pair.
    /// Unrecognized `-burn.*` switches are logged and skipped, never
    /// rejected, per `spec.md` 6's table.
    pub fn parse<I, S>(argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = argv.into_iter().map(Into::into).collect();
        let mut args = Self {
            raw_command_line: tokens.join(" "),
            ..Self::default()
        };

        let mut i = 0;
        while i < tokens.len() {
            let raw = &tokens[i];
            let normalized = normalize_prefix(raw);
            let Some(switch) = normalized.strip_prefix('-') else {
                parse_bare_token(&normalized, raw, &mut args)?;
                i += 1;
                continue;
            };
            let lower = switch.to_ascii_lowercase();
            apply_switch(&lower, raw, &tokens, &mut i, &mut args)?;
            i += 1;
        }
        Ok(args)
    }

    /// Parses the real process argv (skipping the program name).
    ///
    /// # Errors
    /// As [`Self::parse`].
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(std::env::args().skip(1))
    }
}

/// `-X` and `--X` are equivalent to `/X`; normalizes a raw token's
/// leading dashes/slash down to a single `-`, leaving everything after
/// the prefix (including any embedded `=`) untouched. Tokens with no
/// recognizable switch prefix (plain `NAME=VALUE`, or a lone `-`/`/`)
/// are returned unchanged.
fn normalize_prefix(raw: &str) -> String {
    if let Some(rest) = raw.strip_prefix("--") {
        if !rest.is_empty() {
            return format!("-{rest}");
        }
    }
    if let Some(rest) = raw.strip_prefix('/') {
        if rest.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '?') {
            return format!("-{rest}");
        }
    }
    raw.to_string()
}

fn parse_bare_token(normalized: &str, raw: &str, args: &mut Args) -> Result<()> {
    if let Some((name, value)) = normalized.split_once('=') {
        args.variables.push((name.to_string(), value.to_string()));
        Ok(())
    } else {
        Err(EngineError::InvalidArgument {
            detail: format!("unrecognized argument '{raw}'"),
        })
    }
}

fn apply_switch(lower: &str, raw: &str, tokens: &[String], i: &mut usize, args: &mut Args) -> Result<()> {
    match lower {
        "l" | "log" => {
            args.log_mode = LogMode::Overwrite;
            args.log_path = Some(PathBuf::from(next_value(tokens, i, raw)?));
        }
        "log+" => {
            args.log_mode = LogMode::Append;
            args.log_path = Some(PathBuf::from(next_value(tokens, i, raw)?));
        }
        "?" | "h" | "help" => args.action = Action::Help,
        "q" | "quiet" | "s" | "silent" => args.display = Display::None,
        "passive" => args.display = Display::Passive,
        "norestart" => args.restart = Some(Restart::Never),
        "forcerestart" => args.restart = Some(Restart::Always),
        "promptrestart" => args.restart = Some(Restart::Prompt),
        "layout" => args.action = Action::Layout(take_optional_path(tokens, i)),
        "uninstall" => args.action = Action::Uninstall,
        "repair" => args.action = Action::Repair,
        "modify" => args.action = Action::Modify,
        "package" | "update" => args.action = Action::Install,
        "noaupause" => args.noaupause = true,
        "keepaupaused" => args.keepaupaused = true,
        "disablesystemrestore" => args.disable_system_restore = true,
        "originalsource" => args.original_source = Some(next_value(tokens, i, raw)?),
        "parent" => args.parent = Some(ParentRelation::Named(next_value(tokens, i, raw)?)),
        "parent:none" => args.parent = Some(ParentRelation::None),
        "elevated" => args.elevated = Some(parse_pipe_connection(tokens, i, raw)?),
        other if other.starts_with("burn.") => apply_burn_switch(other, raw, tokens, i, args)?,
        _ => {
            return Err(EngineError::InvalidArgument {
                detail: format!("unrecognized switch '{raw}'"),
            })
        }
    }
    Ok(())
}

fn apply_burn_switch(name: &str, raw: &str, tokens: &[String], i: &mut usize, args: &mut Args) -> Result<()> {
    let (bare_name, inline) = name.split_once('=').map_or((name, None), |(n, v)| (n, Some(v.to_string())));
    match bare_name {
        "burn.clean.room" => args.clean_room = Some(PathBuf::from(require_inline(inline, raw)?)),
        "burn.embedded" => args.embedded = Some(parse_pipe_connection(tokens, i, raw)?),
        "burn.related.detect" => args.related = Some(RelatedBundleType::Detect),
        "burn.related.upgrade" => args.related = Some(RelatedBundleType::Upgrade),
        "burn.related.addon" => args.related = Some(RelatedBundleType::Addon),
        "burn.related.patch" => args.related = Some(RelatedBundleType::Patch),
        "burn.related.update" => args.related = Some(RelatedBundleType::Update),
        "burn.passthrough" => args.passthrough = true,
        "burn.disable.unelevate" => args.disable_unelevate = true,
        "burn.runonce" => args.runonce = true,
        "burn.ignoredependencies" => args.ignore_dependencies.extend(split_list(&require_inline(inline, raw)?)),
        "burn.ancestors" => args.ancestors.extend(split_list(&require_inline(inline, raw)?)),
        "burn.filehandle.attached" => args.filehandle_attached = Some(parse_handle(inline, raw)?),
        "burn.filehandle.self" => args.filehandle_self = Some(parse_handle(inline, raw)?),
        _ => tracing::warn!(switch = %raw, "unrecognized -burn.* switch, skipping"),
    }
    Ok(())
}

fn split_list(list: &str) -> Vec<String> {
    list.split(';').filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn parse_handle(inline: Option<String>, raw: &str) -> Result<u64> {
    let text = require_inline(inline, raw)?;
    text.parse::<u64>().map_err(|_| EngineError::InvalidArgument {
        detail: format!("'{raw}' expects a numeric file handle, got '{text}'"),
    })
}

fn require_inline(inline: Option<String>, raw: &str) -> Result<String> {
    inline.ok_or_else(|| EngineError::InvalidArgument {
        detail: format!("'{raw}' requires an inline '=value'"),
    })
}

fn next_value(tokens: &[String], i: &mut usize, raw: &str) -> Result<String> {
    *i += 1;
    tokens.get(*i).cloned().ok_or_else(|| EngineError::InvalidArgument {
        detail: format!("'{raw}' requires a following value"),
    })
}

fn take_optional_path(tokens: &[String], i: &mut usize) -> Option<PathBuf> {
    let candidate = tokens.get(*i + 1)?;
    if candidate.starts_with('-') || candidate.starts_with('/') {
        return None;
    }
    *i += 1;
    Some(PathBuf::from(candidate))
}

fn parse_pipe_connection(tokens: &[String], i: &mut usize, raw: &str) -> Result<PipeConnection> {
    let pipe_name = next_value(tokens, i, raw)?;
    let secret_hex = next_value(tokens, i, raw)?;
    let parent_pid_text = next_value(tokens, i, raw)?;
    let parent_pid = parent_pid_text.parse::<u32>().map_err(|_| EngineError::InvalidArgument {
        detail: format!("'{raw}' expects a numeric pid, got '{parent_pid_text}'"),
    })?;
    Ok(PipeConnection {
        pipe_name,
        secret_hex,
        parent_pid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse(args.iter().map(|s| (*s).to_string())).unwrap()
    }

    #[test]
    fn default_action_is_install() {
        assert_eq!(parse(&[]).action, Action::Install);
    }

    #[test]
    fn dash_slash_and_double_dash_are_equivalent() {
        assert_eq!(parse(&["-uninstall"]).action, Action::Uninstall);
        assert_eq!(parse(&["/uninstall"]).action, Action::Uninstall);
        assert_eq!(parse(&["--uninstall"]).action, Action::Uninstall);
    }

    #[test]
    fn quiet_aliases_all_set_display_none() {
        for switch in ["-q", "-quiet", "-s", "-silent"] {
            assert_eq!(parse(&[switch]).display, Display::None);
        }
    }

    #[test]
    fn effective_restart_defaults_from_display() {
        assert_eq!(parse(&[]).effective_restart(), Restart::Prompt);
        assert_eq!(parse(&["-quiet"]).effective_restart(), Restart::Always);
        assert_eq!(parse(&["-passive"]).effective_restart(), Restart::Always);
        assert_eq!(parse(&["-quiet", "-norestart"]).effective_restart(), Restart::Never);
    }

    #[test]
    fn log_append_sets_mode_and_path() {
        let args = parse(&["-log+", "C:/logs/bundle.log"]);
        assert_eq!(args.log_mode, LogMode::Append);
        assert_eq!(args.log_path, Some(PathBuf::from("C:/logs/bundle.log")));
    }

    #[test]
    fn layout_with_no_directory_defaults_to_none() {
        let args = parse(&["-layout"]);
        assert_eq!(args.action, Action::Layout(None));
    }

    #[test]
    fn layout_consumes_a_following_directory() {
        let args = parse(&["-layout", "out/dir"]);
        assert_eq!(args.action, Action::Layout(Some(PathBuf::from("out/dir"))));
    }

    #[test]
    fn layout_does_not_consume_a_following_switch() {
        let args = parse(&["-layout", "-quiet"]);
        assert_eq!(args.action, Action::Layout(None));
        assert_eq!(args.display, Display::None);
    }

    #[test]
    fn elevated_consumes_three_tokens() {
        let args = parse(&["-elevated", "\\\\.\\pipe\\foo", "deadbeef", "4242"]);
        let elevated = args.elevated.unwrap();
        assert_eq!(elevated.pipe_name, "\\\\.\\pipe\\foo");
        assert_eq!(elevated.secret_hex, "deadbeef");
        assert_eq!(elevated.parent_pid, 4242);
    }

    #[test]
    fn parent_none_is_distinct_from_named_parent() {
        assert_eq!(parse(&["-parent:none"]).parent, Some(ParentRelation::None));
        assert_eq!(
            parse(&["-parent", "Setup.exe"]).parent,
            Some(ParentRelation::Named("Setup.exe".to_string()))
        );
    }

    #[test]
    fn burn_related_sets_relation_type() {
        assert_eq!(parse(&["-burn.related.upgrade"]).related, Some(RelatedBundleType::Upgrade));
    }

    #[test]
    fn burn_ignoredependencies_splits_on_semicolon() {
        let args = parse(&["-burn.ignoredependencies=Foo;Bar;"]);
        assert_eq!(args.ignore_dependencies, vec!["Foo".to_string(), "Bar".to_string()]);
    }

    #[test]
    fn burn_filehandle_parses_numeric_value() {
        let args = parse(&["-burn.filehandle.attached=7"]);
        assert_eq!(args.filehandle_attached, Some(7));
    }

    #[test]
    fn unrecognized_burn_switch_is_skipped_not_rejected() {
        let args = parse(&["-burn.future.feature=1"]).clone();
        assert_eq!(args.action, Action::Install);
    }

    #[test]
    fn unrecognized_non_burn_switch_is_rejected() {
        let err = Args::parse(["-bogus".to_string()]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument { .. }));
    }

    #[test]
    fn bare_name_value_becomes_a_variable() {
        let args = parse(&["MyProp=Hello", "Other=World"]);
        assert_eq!(
            args.variables,
            vec![("MyProp".to_string(), "Hello".to_string()), ("Other".to_string(), "World".to_string())]
        );
    }

    #[test]
    fn raw_command_line_preserves_original_tokens() {
        let args = parse(&["-quiet", "Foo=Bar"]);
        assert_eq!(args.raw_command_line, "-quiet Foo=Bar");
    }
}
