//! Interactive prompts over any line reader

use crate::{Error, Result};
use std::io::{BufRead, Write};

pub const POSITIVE_RESPONSES: [&str; 3] = ["y", "yes", "true"];
pub const NEGATIVE_RESPONSES: [&str; 3] = ["n", "no", "false"];

fn read_line(input: &mut impl BufRead) -> Result<String> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(Error::Config("unexpected end of input while prompting".into()));
    }
    Ok(line.trim().to_string())
}

/// Ask until the answer matches one of `positive` or `negative` (case-insensitive)
pub fn ask_yes_no(
    input: &mut impl BufRead,
    output: &mut impl Write,
    question: &str,
    positive: &[&str],
    negative: &[&str],
) -> Result<bool> {
    loop {
        write!(output, "{question} [y/n]: ")?;
        output.flush()?;

        let answer = read_line(input)?.to_lowercase();
        if positive.contains(&answer.as_str()) {
            return Ok(true);
        }
        if negative.contains(&answer.as_str()) {
            return Ok(false);
        }
        writeln!(output, "Please type yes or no:")?;
    }
}

/// Ask until a non-empty value is entered
pub fn ask_static_value(
    input: &mut impl BufRead,
    output: &mut impl Write,
    question: &str,
) -> Result<String> {
    loop {
        write!(output, "{question}")?;
        output.flush()?;

        let answer = read_line(input)?;
        if !answer.is_empty() {
            return Ok(answer);
        }
        writeln!(output, "--Error, please enter a value:")?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_yes_no_reasks_until_valid() {
        let mut input = Cursor::new("maybe\n  YES \n");
        let mut output = Vec::new();
        let answer = ask_yes_no(
            &mut input,
            &mut output,
            "Enable?",
            &POSITIVE_RESPONSES,
            &NEGATIVE_RESPONSES,
        )
        .unwrap();

        assert!(answer);
        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.matches("Enable? [y/n]: ").count(), 2);
        assert!(text.contains("Please type yes or no:"));
    }

    #[test]
    fn test_yes_no_negative() {
        let mut input = Cursor::new("n\n");
        let answer = ask_yes_no(
            &mut input,
            &mut Vec::new(),
            "Enable?",
            &POSITIVE_RESPONSES,
            &NEGATIVE_RESPONSES,
        )
        .unwrap();
        assert!(!answer);
    }

    #[test]
    fn test_static_value_skips_blank() {
        let mut input = Cursor::new("\n   \nus-west-2\n");
        let mut output = Vec::new();
        let value = ask_static_value(&mut input, &mut output, "-- Enter AWS region: ").unwrap();
        assert_eq!(value, "us-west-2");
        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.matches("--Error, please enter a value:").count(), 2);
    }

    #[test]
    fn test_eof_is_an_error() {
        let mut input = Cursor::new("");
        assert!(ask_static_value(&mut input, &mut Vec::new(), "value: ").is_err());
        let mut input = Cursor::new("perhaps\n");
        assert!(ask_yes_no(&mut input, &mut Vec::new(), "ok?", &["y"], &["n"]).is_err());
    }
}
