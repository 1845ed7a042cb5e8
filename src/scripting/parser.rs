//! Command parsing.
//!
//! Two front-ends produce the same command queue: the argument-vector
//! parser used by `run`, `list`, and `interactive` start-up, and the
//! single-line parser used inside the interactive loop.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::matcher::{MatchAttribute, MatchAttributes};

use super::Command;

// NAME OP VALUE with OPs =, !=, =~ and !~. A token without an operator is a
// hostname glob, valid only at the start of a filter group.
static FILTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^=!~]+)(=~|!~|!=|=)(.*)$").unwrap());

/// Parses one token as an attribute filter, or `None` when it carries no
/// operator.
pub fn parse_filter(token: &str) -> Result<Option<MatchAttribute>> {
    let Some(captures) = FILTER_RE.captures(token) else {
        return Ok(None);
    };
    let name = &captures[1];
    let value = &captures[3];
    let attribute = match &captures[2] {
        "=" => MatchAttribute::matching(name, value),
        "!=" => MatchAttribute::not_matching(name, value),
        "=~" => MatchAttribute::matching_regex(name, compile(value)?),
        "!~" => MatchAttribute::not_matching_regex(name, compile(value)?),
        _ => unreachable!("operator alternatives are exhaustive"),
    };
    Ok(Some(attribute))
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|_| Error::parse(format!("invalid regexp: {}", pattern)))
}

// A bare token only counts as a hostname glob when it could name a host:
// a glob metacharacter or a qualified name. A plain word is a typo'd
// filter, not a glob.
fn is_glob_token(token: &str) -> bool {
    token.contains(['*', '?', '[', '.'])
}

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Add,
    Remove,
}

/// Parses an argument vector into a command queue.
///
/// Arguments before `split_at` form filter groups separated by `+` (add)
/// and `-` (remove); each group is `GLOB [NAME OP VALUE …]`, with the glob
/// defaulting to `*` when the group starts with a filter. Arguments from
/// `split_at` on are joined into a single `run` command.
pub fn parse_command_line(args: &[String], split_at: Option<usize>) -> Result<Vec<Command>> {
    let filter_args = match split_at {
        Some(at) => &args[..at.min(args.len())],
        None => args,
    };

    let mut commands = Vec::new();
    let mut mode = Mode::Add;
    let mut glob: Option<String> = None;
    let mut attributes: MatchAttributes = Vec::new();
    // A separator with nothing to flush ("+ *" alone) does not open a new
    // group, so the token after it fails as a filter.
    let mut glob_allowed = true;

    let flush =
        |commands: &mut Vec<Command>, glob: &mut Option<String>, attributes: &mut MatchAttributes, mode: Mode| {
            match glob.take() {
                Some(glob) => {
                    let attributes = std::mem::take(attributes);
                    commands.push(match mode {
                        Mode::Add => Command::AddHosts {
                            glob,
                            attributes,
                            sampled: Vec::new(),
                            count: 0,
                        },
                        Mode::Remove => Command::RemoveHosts { glob, attributes },
                    });
                    true
                }
                None => false,
            }
        };

    for token in filter_args {
        match token.as_str() {
            "+" | "-" => {
                glob_allowed = flush(&mut commands, &mut glob, &mut attributes, mode);
                mode = if token == "+" { Mode::Add } else { Mode::Remove };
            }
            _ => {
                if let Some(attribute) = parse_filter(token)? {
                    if glob.is_none() {
                        glob = Some("*".to_string());
                    }
                    attributes.push(attribute);
                } else if glob_allowed
                    && glob.is_none()
                    && attributes.is_empty()
                    && is_glob_token(token)
                {
                    glob = Some(token.clone());
                } else {
                    return Err(Error::parse(format!("incorrect filter: {}", token)));
                }
            }
        }
    }
    flush(&mut commands, &mut glob, &mut attributes, mode);

    if let Some(at) = split_at {
        let command = args[at.min(args.len())..].join(" ");
        if !command.is_empty() {
            commands.push(Command::Run { command });
        }
    }
    Ok(commands)
}

/// Parses one interactive line into a command, or `None` for a blank line.
pub fn parse_code_line(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = split_word(line);
    let command = match word {
        "run" => {
            if rest.is_empty() {
                return Err(Error::parse("run needs a command"));
            }
            Command::Run {
                command: rest.to_string(),
            }
        }
        "set" => {
            let (key, value) = split_word(rest);
            if key.is_empty() || value.is_empty() {
                return Err(Error::parse("usage: set OPTION VALUE"));
            }
            if !Settings::is_option(key) {
                return Err(Error::parse(format!("unknown option: {}", key)));
            }
            // Validate the value now so the error surfaces before execute.
            Settings::default().set(key, value)?;
            Command::Set {
                key: key.to_string(),
                value: value.to_string(),
            }
        }
        "add" | "remove" => {
            let (noun, rest) = split_word(rest);
            if noun != "hosts" {
                return Err(Error::parse(format!("unknown command: {}", line)));
            }
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            if tokens.is_empty() {
                return Err(Error::parse(format!("usage: {} hosts GLOB [FILTERS]", word)));
            }
            let (glob, attributes) = parse_filter_group(&tokens)?;
            if word == "add" {
                Command::AddHosts {
                    glob,
                    attributes,
                    sampled: Vec::new(),
                    count: 0,
                }
            } else {
                Command::RemoveHosts { glob, attributes }
            }
        }
        "list" => {
            let (noun, rest) = split_word(rest);
            if noun != "hosts" {
                return Err(Error::parse(format!("unknown command: {}", line)));
            }
            let mut oneline = false;
            let mut csv = false;
            let mut attributes = Vec::new();
            for token in rest.split_whitespace() {
                match token {
                    "oneline" => oneline = true,
                    "csv" => csv = true,
                    _ => attributes.push(token.to_string()),
                }
            }
            Command::ListHosts {
                oneline,
                csv,
                attributes,
            }
        }
        "help" => Command::Help {
            topic: rest.to_string(),
        },
        _ => return Err(Error::parse(format!("unknown command: {}", word))),
    };
    Ok(Some(command))
}

fn parse_filter_group(tokens: &[&str]) -> Result<(String, MatchAttributes)> {
    let mut glob: Option<String> = None;
    let mut attributes = Vec::new();
    for token in tokens {
        if let Some(attribute) = parse_filter(token)? {
            if glob.is_none() {
                glob = Some("*".to_string());
            }
            attributes.push(attribute);
        } else if glob.is_none() && attributes.is_empty() && is_glob_token(token) {
            glob = Some(token.to_string());
        } else {
            return Err(Error::parse(format!("incorrect filter: {}", token)));
        }
    }
    Ok((glob.unwrap_or_else(|| "*".to_string()), attributes))
}

fn split_word(input: &str) -> (&str, &str) {
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_filter_operators() {
        let f = parse_filter("foo=bar").unwrap().unwrap();
        assert_eq!(f, MatchAttribute::matching("foo", "bar"));
        let f = parse_filter("foo!=bar").unwrap().unwrap();
        assert!(f.negate);
        let f = parse_filter("foo=~bar").unwrap().unwrap();
        assert_eq!(
            f,
            MatchAttribute::matching_regex("foo", Regex::new("bar").unwrap())
        );
        let f = parse_filter("foo!~bar").unwrap().unwrap();
        assert!(f.negate);
        assert!(parse_filter("plainglob").unwrap().is_none());
    }

    #[test]
    fn test_invalid_regex_is_a_parse_error() {
        assert!(parse_filter("foo=~[").is_err());
    }

    #[test]
    fn test_interactive_set() {
        let command = parse_code_line("set Parallel 10").unwrap().unwrap();
        assert_eq!(
            command,
            Command::Set {
                key: "Parallel".into(),
                value: "10".into()
            }
        );
        assert!(parse_code_line("set Parallel").is_err());
        assert!(parse_code_line("set Bogus 10").is_err());
        assert!(parse_code_line("set Parallel zero").is_err());
    }

    #[test]
    fn test_interactive_add_and_remove() {
        let command = parse_code_line("add hosts *.example.com role=db").unwrap().unwrap();
        assert_eq!(
            command,
            Command::AddHosts {
                glob: "*.example.com".into(),
                attributes: vec![MatchAttribute::matching("role", "db")],
                sampled: vec![],
                count: 0,
            }
        );
        let command = parse_code_line("remove hosts role=db").unwrap().unwrap();
        assert_eq!(
            command,
            Command::RemoveHosts {
                glob: "*".into(),
                attributes: vec![MatchAttribute::matching("role", "db")],
            }
        );
        assert!(parse_code_line("add hosts").is_err());
        assert!(parse_code_line("add widgets *").is_err());
    }

    #[test]
    fn test_interactive_list_and_run() {
        let command = parse_code_line("list hosts oneline").unwrap().unwrap();
        assert_eq!(
            command,
            Command::ListHosts {
                oneline: true,
                csv: false,
                attributes: vec![]
            }
        );
        let command = parse_code_line("list hosts csv site role").unwrap().unwrap();
        assert_eq!(
            command,
            Command::ListHosts {
                oneline: false,
                csv: true,
                attributes: vec!["site".into(), "role".into()]
            }
        );
        let command = parse_code_line("run uptime -a").unwrap().unwrap();
        assert_eq!(
            command,
            Command::Run {
                command: "uptime -a".into()
            }
        );
        assert!(parse_code_line("run").is_err());
        assert!(parse_code_line("frobnicate").is_err());
        assert_eq!(parse_code_line("   ").unwrap(), None);
    }

    #[test]
    fn test_command_line_basic_group() {
        let commands = parse_command_line(&argv(&["*"]), None).unwrap();
        assert_eq!(
            commands,
            vec![Command::AddHosts {
                glob: "*".into(),
                attributes: vec![],
                sampled: vec![],
                count: 0
            }]
        );
    }

    #[test]
    fn test_command_line_leading_separator_is_invalid() {
        let err = parse_command_line(&argv(&["+", "*"]), None).unwrap_err();
        assert_eq!(err.to_string(), "incorrect filter: *");
    }

    #[test]
    fn test_command_line_bare_token_after_glob_is_invalid() {
        let err = parse_command_line(&argv(&["*", "foo"]), None).unwrap_err();
        assert_eq!(err.to_string(), "incorrect filter: foo");
    }

    #[test]
    fn test_command_line_bare_word_is_not_a_glob() {
        let err = parse_command_line(&argv(&["foo"]), None).unwrap_err();
        assert_eq!(err.to_string(), "incorrect filter: foo");
        // A qualified name or a metacharacter makes it a glob.
        assert!(parse_command_line(&argv(&["web1.example.com"]), None).is_ok());
        assert!(parse_command_line(&argv(&["web?"]), None).is_ok());
    }

    #[test]
    fn test_command_line_run_after_dash_dash() {
        let args = argv(&["*", "role=db", "id", "seveas"]);
        let commands = parse_command_line(&args, Some(2)).unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[1],
            Command::Run {
                command: "id seveas".into()
            }
        );
    }
}
