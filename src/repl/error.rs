use std::error::Error;
use std::fmt;

use super::command::CommandName;
use crate::symbol::Opcode;

/// Indent of detail lines under an argument error.
const DETAIL: &str = "\n        ";

/// A debugger line that is not a usable command.
#[derive(Debug, PartialEq)]
pub enum CommandError {
    Invalid {
        command_name: String,
        suggested: Option<CommandName>,
    },
    MissingSubcommand {
        command_name: &'static str,
    },
    InvalidSubcommand {
        command_name: &'static str,
        subcommand_name: String,
        suggested: Option<CommandName>,
    },
    InvalidArgument {
        command_name: CommandName,
        error: ArgumentError,
    },
}

#[derive(Debug, PartialEq)]
pub enum ArgumentError {
    Missing {
        argument_name: &'static str,
        expected_count: u8,
        actual_count: u8,
    },
    TooManyArguments {
        expected_count: u8,
        actual_count: u8,
    },
    InvalidValue {
        argument_name: &'static str,
        string: String,
        error: ValueError,
    },
}

#[derive(Debug, PartialEq)]
pub enum ValueError {
    MismatchedType {
        expected_type: &'static str,
        actual_type: &'static str,
    },
    Malformed,
    MalformedInteger,
    MalformedLabel,
    IntegerTooLarge { max: u16 },
    InvalidWidth,
    InvalidCondition,
}

impl Error for CommandError {}
impl Error for ArgumentError {}
impl Error for ValueError {}

fn did_you_mean(f: &mut fmt::Formatter<'_>, suggested: &Option<CommandName>) -> fmt::Result {
    match suggested {
        Some(name) => write!(f, "\n    Did you mean `{}`?", name),
        None => Ok(()),
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid {
                command_name,
                suggested,
            } => {
                write!(f, "Not a command: `{}`.", command_name)?;
                did_you_mean(f, suggested)?;
                if Opcode::lookup(command_name).is_some() {
                    write!(
                        f,
                        "\n    Instructions cannot be run from the debugger. Edit the source and re-assemble."
                    )?;
                }
                Ok(())
            }
            Self::MissingSubcommand { command_name } => {
                write!(f, "Missing subcommand: `{} (...)`.", command_name)
            }
            Self::InvalidSubcommand {
                command_name,
                subcommand_name,
                suggested,
            } => {
                write!(f, "Invalid subcommand: `{} {}`.", command_name, subcommand_name)?;
                did_you_mean(f, suggested)
            }
            Self::InvalidArgument {
                command_name,
                error,
            } => write!(f, "In command `{}`:\n    {}", command_name, error),
        }
    }
}

impl fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (expected, actual) = match self {
            Self::InvalidValue {
                argument_name,
                string,
                error,
            } => {
                return write!(f, "For argument `{}`: `{}`.{DETAIL}{}", argument_name, string, error);
            }
            Self::Missing {
                argument_name,
                expected_count,
                actual_count,
            } => {
                write!(f, "Missing argument `{}`.", argument_name)?;
                (*expected_count, *actual_count)
            }
            Self::TooManyArguments {
                expected_count,
                actual_count,
            } => {
                write!(f, "Too many arguments.")?;
                (*expected_count, *actual_count)
            }
        };
        write!(
            f,
            "{DETAIL}Expected {} argument{}, found {}.",
            expected,
            if expected == 1 { "" } else { "s" },
            actual
        )
    }
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MismatchedType {
                expected_type,
                actual_type,
            } => write!(
                f,
                "Incorrect value type.{DETAIL}Expected {}.{DETAIL}Found {}.",
                expected_type, actual_type
            ),
            Self::Malformed => write!(f, "Invalid value."),
            Self::MalformedInteger => write!(f, "Malformed integer."),
            Self::MalformedLabel => write!(f, "Malformed label."),
            Self::IntegerTooLarge { max } => {
                write!(f, "Integer too large.{DETAIL}Maximum value: 0x{:04x}.", max)
            }
            Self::InvalidWidth => write!(f, "Width must be 1, 2 or 4 bytes."),
            Self::InvalidCondition => write!(f, "Condition must be `read`, `write` or `change`."),
        }
    }
}

impl ArgumentError {
    /// Wrap a [`ValueError`] for `argument` as [`ArgumentError::InvalidValue`].
    pub fn invalid_value<'a>(
        argument_name: &'static str,
        argument: &'a str,
    ) -> impl Fn(ValueError) -> Self + 'a {
        move |error| Self::InvalidValue {
            argument_name,
            string: argument.to_string(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_counts_are_pluralised() {
        let one = ArgumentError::Missing {
            argument_name: "location",
            expected_count: 1,
            actual_count: 0,
        };
        assert_eq!(
            one.to_string(),
            "Missing argument `location`.\n        Expected 1 argument, found 0."
        );
        let many = ArgumentError::TooManyArguments {
            expected_count: 2,
            actual_count: 3,
        };
        assert_eq!(
            many.to_string(),
            "Too many arguments.\n        Expected 2 arguments, found 3."
        );
    }

    #[test]
    fn invalid_value_names_the_token() {
        let error = ArgumentError::invalid_value("width", "3")(ValueError::InvalidWidth);
        assert_eq!(
            error.to_string(),
            "For argument `width`: `3`.\n        Width must be 1, 2 or 4 bytes."
        );
    }
}
