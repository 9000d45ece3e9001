use std::fmt;
use std::str::{FromStr, SplitWhitespace};

use super::error;
use crate::debugger::WatchCondition;
use crate::lexer::is_identifier;
use crate::literal::{is_numeric_start, parse_number};
use crate::suggest::suggest;
use crate::symbol::Register;

#[derive(Debug, PartialEq)]
pub enum Command<'a> {
    Help,
    Step { count: u16 },
    Back { count: u16 },
    Continue,
    Until { location: MemoryLocation<'a> },
    Reset,
    Registers,
    Get { location: Location<'a> },
    Disasm,
    Source { location: MemoryLocation<'a> },
    Trace { count: u16 },
    Output,
    Quit,
    BreakList,
    BreakAdd { location: MemoryLocation<'a> },
    BreakRemove { location: MemoryLocation<'a> },
    WatchList,
    WatchAdd {
        location: MemoryLocation<'a>,
        width: u8,
        condition: Option<WatchCondition>,
    },
    WatchRemove { location: MemoryLocation<'a> },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CommandName {
    Help,
    Step,
    Back,
    Continue,
    Until,
    Reset,
    Registers,
    Get,
    Disasm,
    Source,
    Trace,
    Output,
    Quit,
    BreakList,
    BreakAdd,
    BreakRemove,
    WatchList,
    WatchAdd,
    WatchRemove,
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Help => write!(f, "help"),
            Self::Step => write!(f, "step"),
            Self::Back => write!(f, "back"),
            Self::Continue => write!(f, "continue"),
            Self::Until => write!(f, "until"),
            Self::Reset => write!(f, "reset"),
            Self::Registers => write!(f, "registers"),
            Self::Get => write!(f, "get"),
            Self::Disasm => write!(f, "disasm"),
            Self::Source => write!(f, "source"),
            Self::Trace => write!(f, "trace"),
            Self::Output => write!(f, "output"),
            Self::Quit => write!(f, "quit"),
            Self::BreakList => write!(f, "break list"),
            Self::BreakAdd => write!(f, "break add"),
            Self::BreakRemove => write!(f, "break remove"),
            Self::WatchList => write!(f, "watch list"),
            Self::WatchAdd => write!(f, "watch add"),
            Self::WatchRemove => write!(f, "watch remove"),
        }
    }
}

/// Register or memory location.
#[derive(Debug, PartialEq)]
pub enum Location<'a> {
    Register(Register),
    Memory(MemoryLocation<'a>),
}

#[derive(Debug, PartialEq)]
pub enum MemoryLocation<'a> {
    /// Relative to the instruction pointer. Written `^`, `^+2`, `^-1`.
    IpOffset(i16),
    Address(u16),
    Label(Label<'a>),
}

/// Label with offset, eg. `loop+2`.
#[derive(Debug, PartialEq)]
pub struct Label<'a> {
    pub name: &'a str,
    pub offset: i16,
}

#[rustfmt::skip]
const COMMANDS: &[(CommandName, &[&str])] = &[
    (CommandName::Help,        &["help", "h", "--help", "-h"]),
    (CommandName::Step,        &["step", "s"]),
    (CommandName::Back,        &["back", "bk"]),
    (CommandName::Continue,    &["continue", "cont", "c"]),
    (CommandName::Until,       &["until", "u"]),
    (CommandName::Reset,       &["reset"]),
    (CommandName::Registers,   &["registers", "reg", "r"]),
    (CommandName::Get,         &["get", "g"]),
    (CommandName::Disasm,      &["disasm", "dis", "d"]),
    (CommandName::Source,      &["source", "src"]),
    (CommandName::Trace,       &["trace", "t"]),
    (CommandName::Output,      &["output", "out", "o"]),
    (CommandName::Quit,        &["quit", "q", "exit"]),
    (CommandName::BreakList,   &["breaklist", "bl"]),
    (CommandName::BreakAdd,    &["breakadd", "ba"]),
    (CommandName::BreakRemove, &["breakremove", "br"]),
    (CommandName::WatchList,   &["watchlist", "wl"]),
    (CommandName::WatchAdd,    &["watchadd", "wa"]),
    (CommandName::WatchRemove, &["watchremove", "wr"]),
];

const BREAK_COMMAND: &[&str] = &["break", "b"];
const WATCH_COMMAND: &[&str] = &["watch", "w"];

#[rustfmt::skip]
const BREAK_SUBCOMMANDS: &[(CommandName, &[&str])] = &[
    (CommandName::BreakList,   &["list", "l"]),
    (CommandName::BreakAdd,    &["add", "a"]),
    (CommandName::BreakRemove, &["remove", "r"]),
];

#[rustfmt::skip]
const WATCH_SUBCOMMANDS: &[(CommandName, &[&str])] = &[
    (CommandName::WatchList,   &["list", "l"]),
    (CommandName::WatchAdd,    &["add", "a"]),
    (CommandName::WatchRemove, &["remove", "r"]),
];

/// Amount of trace entries shown when no count is given.
const DEFAULT_TRACE_COUNT: u16 = 8;

/// Returns `true` if `name` matches any item of `candidates` (case insensitive).
fn matches(name: &str, candidates: &[&str]) -> bool {
    candidates
        .iter()
        .any(|candidate| name.eq_ignore_ascii_case(candidate))
}

/// Returns the first [`CommandName`] with a candidate matching `name` (case insensitive).
fn find_match(name: &str, commands: &[(CommandName, &[&str])]) -> Option<CommandName> {
    commands
        .iter()
        .find(|(_, candidates)| matches(name, candidates))
        .map(|(command, _)| *command)
}

/// Closest command to a misspelled `name`, by canonical name only.
fn find_suggestion(name: &str, commands: &[(CommandName, &[&str])]) -> Option<CommandName> {
    let suggested = suggest(name, commands.iter().map(|(_, candidates)| candidates[0]))?;
    find_match(suggested, commands)
}

impl<'a> TryFrom<&'a str> for Command<'a> {
    type Error = error::CommandError;

    /// Assumes line is non-empty.
    fn try_from(line: &'a str) -> Result<Self, Self::Error> {
        let mut iter = ArgIter::from(line);

        let command_name = iter.get_command_name()?;
        Command::parse_arguments(command_name, &mut iter).map_err(|error| {
            error::CommandError::InvalidArgument {
                command_name,
                error,
            }
        })
    }
}

impl<'a> Command<'a> {
    fn parse_arguments(name: CommandName, iter: &mut ArgIter<'a>) -> Result<Self, error::ArgumentError> {
        let mut expected_args = 0;

        let command = match name {
            // Allow trailing arguments
            CommandName::Help => return Ok(Self::Help),

            CommandName::Continue => Self::Continue,
            CommandName::Reset => Self::Reset,
            CommandName::Registers => Self::Registers,
            CommandName::Disasm => Self::Disasm,
            CommandName::Output => Self::Output,
            CommandName::Quit => Self::Quit,
            CommandName::BreakList => Self::BreakList,
            CommandName::WatchList => Self::WatchList,

            CommandName::Step => {
                expected_args = 1;
                let count = iter.next_positive_integer_or("count", 1)?;
                Self::Step { count }
            }
            CommandName::Back => {
                expected_args = 1;
                let count = iter.next_positive_integer_or("count", 1)?;
                Self::Back { count }
            }
            CommandName::Trace => {
                expected_args = 1;
                let count = iter.next_positive_integer_or("count", DEFAULT_TRACE_COUNT)?;
                Self::Trace { count }
            }

            CommandName::Until => {
                expected_args = 1;
                let location = iter.next_memory_location("location", expected_args)?;
                Self::Until { location }
            }
            CommandName::Get => {
                expected_args = 1;
                let location = iter.next_location("location", expected_args)?;
                Self::Get { location }
            }
            CommandName::Source => {
                expected_args = 1;
                let location = iter.next_memory_location_or_default("location")?;
                Self::Source { location }
            }

            CommandName::BreakAdd => {
                expected_args = 1;
                let location = iter.next_memory_location_or_default("location")?;
                Self::BreakAdd { location }
            }
            CommandName::BreakRemove => {
                expected_args = 1;
                let location = iter.next_memory_location_or_default("location")?;
                Self::BreakRemove { location }
            }

            CommandName::WatchAdd => {
                expected_args = 3;
                let location = iter.next_memory_location("address", expected_args)?;
                let width = iter.next_width_or_default("width")?;
                let condition = iter.next_condition("condition")?;
                Self::WatchAdd {
                    location,
                    width,
                    condition,
                }
            }
            CommandName::WatchRemove => {
                expected_args = 1;
                let location = iter.next_memory_location("address", expected_args)?;
                Self::WatchRemove { location }
            }
        };

        iter.expect_end(expected_args)?;

        Ok(command)
    }
}

#[derive(Debug, PartialEq)]
enum Argument<'a> {
    Register(Register),
    Integer(i32),
    Label(Label<'a>),
    IpOffset(i16),
}

impl Argument<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Argument::Register(_) => "register",
            Argument::Integer(_) => "integer",
            Argument::Label(_) => "label",
            Argument::IpOffset(_) => "instruction pointer offset",
        }
    }
}

/// Whitespace-separated arguments of one command.
pub struct ArgIter<'a> {
    parts: SplitWhitespace<'a>,
    /// Most recently consumed argument.
    last: &'a str,
    /// Amount of arguments requested (successfully or not).
    arg_count: u8,
}

impl<'a> From<&'a str> for ArgIter<'a> {
    fn from(line: &'a str) -> Self {
        Self {
            parts: line.split_whitespace(),
            last: "",
            arg_count: 0,
        }
    }
}

impl<'a> ArgIter<'a> {
    /// Parse and consume command name.
    ///
    /// Considers multi-word command names (i.e. subcommands) as one name. Eg. `break add`.
    pub fn get_command_name(&mut self) -> Result<CommandName, error::CommandError> {
        let command_name = self.parts.next().unwrap_or("");

        if let Some(command) = find_match(command_name, COMMANDS) {
            return Ok(command);
        }

        for (group, subcommands) in [
            (BREAK_COMMAND, BREAK_SUBCOMMANDS),
            (WATCH_COMMAND, WATCH_SUBCOMMANDS),
        ] {
            if !matches(command_name, group) {
                continue;
            }
            // Normalize name and get as `'static`
            let command_name = group[0];
            let Some(subname) = self.parts.next() else {
                return Err(error::CommandError::MissingSubcommand { command_name });
            };
            if let Some(command) = find_match(subname, subcommands) {
                return Ok(command);
            }
            return Err(error::CommandError::InvalidSubcommand {
                command_name,
                subcommand_name: subname.to_string(),
                suggested: find_suggestion(subname, subcommands),
            });
        }

        Err(error::CommandError::Invalid {
            command_name: command_name.to_string(),
            suggested: find_suggestion(command_name, COMMANDS),
        })
    }

    fn next_token(&mut self) -> Option<&'a str> {
        self.arg_count += 1;
        let token = self.parts.next()?;
        self.last = token;
        Some(token)
    }

    /// Parse and consume the next [`Argument`].
    fn next_argument(
        &mut self,
        argument_name: &'static str,
    ) -> Result<Option<Argument<'a>>, error::ArgumentError> {
        let Some(token) = self.next_token() else {
            return Ok(None);
        };
        parse_argument(token)
            .map(Some)
            .map_err(error::ArgumentError::invalid_value(argument_name, token))
    }

    fn missing(&self, argument_name: &'static str, expected_count: u8) -> error::ArgumentError {
        error::ArgumentError::Missing {
            argument_name,
            expected_count,
            actual_count: self.arg_count - 1,
        }
    }

    /// Parse and consume next positive integer argument, defaulting to `default`.
    ///
    /// Non-positive values are raised to `1`.
    pub fn next_positive_integer_or(
        &mut self,
        argument_name: &'static str,
        default: u16,
    ) -> Result<u16, error::ArgumentError> {
        match self.next_argument(argument_name)? {
            Some(Argument::Integer(value)) => Ok(value.clamp(1, u16::MAX as i32) as u16),
            Some(value) => Err(self.mismatched(argument_name, "integer", &value)),
            None => Ok(default),
        }
    }

    /// Parse and consume next [`Location`] argument: a register or [`MemoryLocation`].
    pub fn next_location(
        &mut self,
        argument_name: &'static str,
        expected_count: u8,
    ) -> Result<Location<'a>, error::ArgumentError> {
        match self.next_argument(argument_name)? {
            Some(Argument::Register(register)) => Ok(Location::Register(register)),
            Some(argument) => self.memory_location(argument_name, argument).map(Location::Memory),
            None => Err(self.missing(argument_name, expected_count)),
        }
    }

    /// Parse and consume next [`MemoryLocation`] argument.
    pub fn next_memory_location(
        &mut self,
        argument_name: &'static str,
        expected_count: u8,
    ) -> Result<MemoryLocation<'a>, error::ArgumentError> {
        match self.next_argument(argument_name)? {
            Some(argument) => self.memory_location(argument_name, argument),
            None => Err(self.missing(argument_name, expected_count)),
        }
    }

    /// Parse and consume next [`MemoryLocation`] argument, defaulting to the instruction
    /// pointer.
    pub fn next_memory_location_or_default(
        &mut self,
        argument_name: &'static str,
    ) -> Result<MemoryLocation<'a>, error::ArgumentError> {
        match self.next_argument(argument_name)? {
            Some(argument) => self.memory_location(argument_name, argument),
            None => Ok(MemoryLocation::IpOffset(0)),
        }
    }

    /// Watch width in bytes, defaulting to a word.
    pub fn next_width_or_default(
        &mut self,
        argument_name: &'static str,
    ) -> Result<u8, error::ArgumentError> {
        let Some(token) = self.next_token() else {
            return Ok(2);
        };
        let invalid = error::ArgumentError::invalid_value(argument_name, token);
        match token.parse::<u8>() {
            Ok(width @ (1 | 2 | 4)) => Ok(width),
            _ => Err(invalid(error::ValueError::InvalidWidth)),
        }
    }

    pub fn next_condition(
        &mut self,
        argument_name: &'static str,
    ) -> Result<Option<WatchCondition>, error::ArgumentError> {
        let Some(token) = self.next_token() else {
            return Ok(None);
        };
        let invalid = error::ArgumentError::invalid_value(argument_name, token);
        WatchCondition::from_str(token)
            .map(Some)
            .map_err(|()| invalid(error::ValueError::InvalidCondition))
    }

    fn mismatched(
        &self,
        argument_name: &'static str,
        expected_type: &'static str,
        actual: &Argument,
    ) -> error::ArgumentError {
        error::ArgumentError::InvalidValue {
            argument_name,
            string: self.last.to_string(),
            error: error::ValueError::MismatchedType {
                expected_type,
                actual_type: actual.kind(),
            },
        }
    }

    fn memory_location(
        &self,
        argument_name: &'static str,
        argument: Argument<'a>,
    ) -> Result<MemoryLocation<'a>, error::ArgumentError> {
        let invalid = error::ArgumentError::invalid_value(argument_name, self.last);
        match argument {
            Argument::Integer(address) => u16::try_from(address)
                .map(MemoryLocation::Address)
                .map_err(|_| invalid(error::ValueError::IntegerTooLarge { max: u16::MAX })),
            Argument::Label(label) => Ok(MemoryLocation::Label(label)),
            Argument::IpOffset(offset) => Ok(MemoryLocation::IpOffset(offset)),
            Argument::Register(_) => {
                Err(self.mismatched(argument_name, "address or label", &argument))
            }
        }
    }

    /// Fail if any argument remains.
    pub fn expect_end(&mut self, expected_count: u8) -> Result<(), error::ArgumentError> {
        let rest = self.parts.clone().count() as u8;
        if rest > 0 {
            return Err(error::ArgumentError::TooManyArguments {
                expected_count,
                actual_count: expected_count.max(self.arg_count) + rest,
            });
        }
        Ok(())
    }
}

fn parse_argument(token: &str) -> Result<Argument<'_>, error::ValueError> {
    if let Some(rest) = token.strip_prefix('^') {
        if rest.is_empty() {
            return Ok(Argument::IpOffset(0));
        }
        return parse_offset(rest).map(Argument::IpOffset);
    }
    if let Ok(register) = Register::from_str(token) {
        return Ok(Argument::Register(register));
    }
    if is_numeric_start(token) {
        return parse_number(token)
            .map(Argument::Integer)
            .map_err(|_| error::ValueError::MalformedInteger);
    }
    let (name, offset) = match token.find(['+', '-']) {
        Some(index) => (&token[..index], parse_offset(&token[index..])?),
        None => (token, 0),
    };
    if !is_identifier(name) {
        return Err(error::ValueError::Malformed);
    }
    Ok(Argument::Label(Label { name, offset }))
}

/// Signed offset such as `+4` or `-0x10`.
fn parse_offset(token: &str) -> Result<i16, error::ValueError> {
    let (negative, digits) = match token.as_bytes().first() {
        Some(b'+') => (false, &token[1..]),
        Some(b'-') => (true, &token[1..]),
        _ => return Err(error::ValueError::MalformedLabel),
    };
    let value = parse_number(digits).map_err(|_| error::ValueError::MalformedInteger)?;
    let value = if negative { -value } else { value };
    i16::try_from(value).map_err(|_| error::ValueError::IntegerTooLarge {
        max: i16::MAX as u16,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Command<'_>, error::CommandError> {
        Command::try_from(line)
    }

    #[test]
    fn command_names() {
        assert_eq!(parse("help"), Ok(Command::Help));
        assert_eq!(parse("  C  "), Ok(Command::Continue));
        assert_eq!(parse("s"), Ok(Command::Step { count: 1 }));
        assert_eq!(parse("step 0x10"), Ok(Command::Step { count: 16 }));
        assert_eq!(parse("step -4"), Ok(Command::Step { count: 1 }));
        assert_eq!(parse("trace"), Ok(Command::Trace { count: 8 }));
        assert_eq!(parse("b l"), Ok(Command::BreakList));
        assert_eq!(parse("watch list"), Ok(Command::WatchList));
        assert_eq!(parse("quit"), Ok(Command::Quit));
    }

    #[test]
    fn locations() {
        assert_eq!(
            parse("get r3"),
            Ok(Command::Get {
                location: Location::Register(Register::General(3))
            })
        );
        assert_eq!(
            parse("get count"),
            Ok(Command::Get {
                location: Location::Memory(MemoryLocation::Label(Label {
                    name: "count",
                    offset: 0
                }))
            })
        );
        assert_eq!(
            parse("break add loop+2"),
            Ok(Command::BreakAdd {
                location: MemoryLocation::Label(Label {
                    name: "loop",
                    offset: 2
                })
            })
        );
        assert_eq!(
            parse("ba"),
            Ok(Command::BreakAdd {
                location: MemoryLocation::IpOffset(0)
            })
        );
        assert_eq!(
            parse("until ^-1"),
            Ok(Command::Until {
                location: MemoryLocation::IpOffset(-1)
            })
        );
        assert_eq!(
            parse("source 4"),
            Ok(Command::Source {
                location: MemoryLocation::Address(4)
            })
        );
    }

    #[test]
    fn watch_arguments() {
        assert_eq!(
            parse("watch add 0x10"),
            Ok(Command::WatchAdd {
                location: MemoryLocation::Address(16),
                width: 2,
                condition: None
            })
        );
        assert_eq!(
            parse("wa buf 4 write"),
            Ok(Command::WatchAdd {
                location: MemoryLocation::Label(Label {
                    name: "buf",
                    offset: 0
                }),
                width: 4,
                condition: Some(WatchCondition::Write)
            })
        );
        assert!(matches!(
            parse("wa buf 3"),
            Err(error::CommandError::InvalidArgument {
                command_name: CommandName::WatchAdd,
                error: error::ArgumentError::InvalidValue {
                    error: error::ValueError::InvalidWidth,
                    ..
                }
            })
        ));
    }

    #[test]
    fn suggestions() {
        assert_eq!(
            parse("stpe"),
            Err(error::CommandError::Invalid {
                command_name: "stpe".to_string(),
                suggested: Some(CommandName::Step),
            })
        );
        assert_eq!(
            parse("break ad"),
            Err(error::CommandError::InvalidSubcommand {
                command_name: "break",
                subcommand_name: "ad".to_string(),
                suggested: Some(CommandName::BreakAdd),
            })
        );
        assert_eq!(
            parse("watch"),
            Err(error::CommandError::MissingSubcommand {
                command_name: "watch"
            })
        );
    }

    #[test]
    fn argument_errors() {
        assert_eq!(
            parse("until"),
            Err(error::CommandError::InvalidArgument {
                command_name: CommandName::Until,
                error: error::ArgumentError::Missing {
                    argument_name: "location",
                    expected_count: 1,
                    actual_count: 0,
                },
            })
        );
        assert_eq!(
            parse("reset now"),
            Err(error::CommandError::InvalidArgument {
                command_name: CommandName::Reset,
                error: error::ArgumentError::TooManyArguments {
                    expected_count: 0,
                    actual_count: 1,
                },
            })
        );
        assert!(parse("until r1").is_err());
        assert!(parse("get 0xfffff").is_err());
        assert!(parse("get lo$p").is_err());
    }
}
