//! Command-line parsing table tests for the script engine.

use std::sync::Arc;

use async_trait::async_trait;
use herd::config::Settings;
use herd::host::Host;
use herd::matcher::MatchAttribute;
use herd::provider::Loader;
use herd::result::{OutputLine, RunResult};
use herd::runner::Executor;
use herd::scripting::{Command, ScriptEngine};
use pretty_assertions::assert_eq;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct NullExecutor;

#[async_trait]
impl Executor for NullExecutor {
    async fn run(
        &self,
        _token: &CancellationToken,
        host: &Arc<Host>,
        _command: &str,
        _output: Option<mpsc::Sender<OutputLine>>,
    ) -> RunResult {
        let mut result = RunResult::started(&host.name);
        result.exit_status = 0;
        result.finish();
        result
    }
}

fn engine() -> ScriptEngine {
    ScriptEngine::new(Settings::default(), Loader::new(), Arc::new(NullExecutor))
}

fn argv(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

fn add(glob: &str, attributes: Vec<MatchAttribute>) -> Command {
    Command::AddHosts {
        glob: glob.to_string(),
        attributes,
        sampled: vec![],
        count: 0,
    }
}

fn remove(glob: &str, attributes: Vec<MatchAttribute>) -> Command {
    Command::RemoveHosts {
        glob: glob.to_string(),
        attributes,
    }
}

#[test]
fn test_parse_command_line() {
    let tests: Vec<(Vec<String>, Result<Vec<Command>, &str>)> = vec![
        (argv(&["*"]), Ok(vec![add("*", vec![])])),
        (argv(&["+", "*"]), Err("incorrect filter: *")),
        (
            argv(&["*", "foo=bar"]),
            Ok(vec![add("*", vec![MatchAttribute::matching("foo", "bar")])]),
        ),
        (
            argv(&["*", "foo=bar", "baz=quux"]),
            Ok(vec![add(
                "*",
                vec![
                    MatchAttribute::matching("foo", "bar"),
                    MatchAttribute::matching("baz", "quux"),
                ],
            )]),
        ),
        (
            argv(&["*", "foo=bar", "+", "*", "baz=quux"]),
            Ok(vec![
                add("*", vec![MatchAttribute::matching("foo", "bar")]),
                add("*", vec![MatchAttribute::matching("baz", "quux")]),
            ]),
        ),
        (
            argv(&["*", "foo=bar", "-", "*", "baz=quux"]),
            Ok(vec![
                add("*", vec![MatchAttribute::matching("foo", "bar")]),
                remove("*", vec![MatchAttribute::matching("baz", "quux")]),
            ]),
        ),
        (
            argv(&["*", "foo=bar", "-", "*", "baz=quux", "+", "*", "zoinks=floop"]),
            Ok(vec![
                add("*", vec![MatchAttribute::matching("foo", "bar")]),
                remove("*", vec![MatchAttribute::matching("baz", "quux")]),
                add("*", vec![MatchAttribute::matching("zoinks", "floop")]),
            ]),
        ),
        (argv(&["*", "foo"]), Err("incorrect filter: foo")),
        (
            argv(&["*", "foo!=bar"]),
            Ok(vec![add("*", vec![MatchAttribute::not_matching("foo", "bar")])]),
        ),
        (
            argv(&["*", "foo=~bar"]),
            Ok(vec![add(
                "*",
                vec![MatchAttribute::matching_regex(
                    "foo",
                    Regex::new("bar").unwrap(),
                )],
            )]),
        ),
        (
            argv(&["*", "foo!~bar"]),
            Ok(vec![add(
                "*",
                vec![MatchAttribute::not_matching_regex(
                    "foo",
                    Regex::new("bar").unwrap(),
                )],
            )]),
        ),
        (
            argv(&["foo=bar"]),
            Ok(vec![add("*", vec![MatchAttribute::matching("foo", "bar")])]),
        ),
        (
            argv(&["foo=bar", "+", "baz=quux"]),
            Ok(vec![
                add("*", vec![MatchAttribute::matching("foo", "bar")]),
                add("*", vec![MatchAttribute::matching("baz", "quux")]),
            ]),
        ),
    ];

    for (args, expected) in tests {
        let mut e = engine();
        let outcome = e.parse_command_line(&args, None);
        match &expected {
            Ok(commands) => {
                assert!(outcome.is_ok(), "unexpected error for {:?}: {:?}", args, outcome);
                assert_eq!(e.queued_commands(), commands.as_slice(), "args: {:?}", args);
            }
            Err(message) => {
                let err = outcome.expect_err("expected a parse error");
                assert_eq!(&err.to_string(), message, "args: {:?}", args);
                assert!(e.queued_commands().is_empty());
            }
        }

        // The same argument vector with a command after -- appends one run.
        if let Ok(commands) = expected {
            let mut args = args.clone();
            let split_at = args.len();
            args.push("id".to_string());
            args.push("seveas".to_string());

            let mut e = engine();
            e.parse_command_line(&args, Some(split_at)).unwrap();
            let mut expected = commands.clone();
            expected.push(Command::Run {
                command: "id seveas".to_string(),
            });
            assert_eq!(e.queued_commands(), expected.as_slice(), "args: {:?}", args);
        }
    }
}

#[test]
fn test_parse_error_leaves_queue_empty() {
    let mut e = engine();
    let err = e.parse_command_line(&argv(&["foo"]), None).unwrap_err();
    assert_eq!(err.to_string(), "incorrect filter: foo");
    assert!(e.queued_commands().is_empty());
}
