use std::{fmt, str::FromStr};

use anyhow::{anyhow, bail, Error, Result};
use strum::{Display, EnumString};

/// Values a basecaller command can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Placeholder {
    /// Directory holding the chunk of the dataset processed by one job.
    FileList,
    NumBaseModThreads,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Value(Placeholder),
}

/// A basecaller command line with `${name}` or `$name` placeholders, `$$` for a literal `$`.
///
/// Placeholders are checked when the template is parsed, so rendering cannot fail.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandTemplate {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, Copy)]
pub struct TemplateParams<'a> {
    pub file_list: &'a str,
    pub num_base_mod_threads: u32,
}

impl CommandTemplate {
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = vec![];
        let mut text = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((position, c)) = chars.next() {
            if c != '$' {
                text.push(c);
                continue;
            }
            let next = chars.peek().map(|(_, c)| *c);
            let name = match next {
                Some('$') => {
                    chars.next();
                    text.push('$');
                    continue;
                },
                Some('{') => {
                    chars.next();
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some((_, '}')) => break,
                            Some((_, c)) => name.push(c),
                            None => bail!("Unterminated placeholder at position {}", position),
                        }
                    }
                    if !is_identifier(&name) {
                        bail!("Invalid placeholder ${{{}}} at position {}", name, position);
                    }
                    name
                },
                Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                    let mut name = String::new();
                    while let Some(&(_, c)) = chars.peek() {
                        if !(c.is_ascii_alphanumeric() || c == '_') {
                            break;
                        }
                        name.push(c);
                        chars.next();
                    }
                    name
                },
                _ => bail!("Invalid placeholder at position {}", position),
            };

            let placeholder = name
                .parse::<Placeholder>()
                .map_err(|_| anyhow!("Unknown placeholder {} at position {}", name, position))?;
            if !text.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut text)));
            }
            segments.push(Segment::Value(placeholder));
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Ok(CommandTemplate {
            source: source.to_owned(),
            segments,
        })
    }

    pub fn placeholders(&self) -> impl Iterator<Item = Placeholder> + '_ {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Value(placeholder) => Some(*placeholder),
            Segment::Text(_) => None,
        })
    }

    pub fn render(&self, params: &TemplateParams) -> String {
        let mut command = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => command.push_str(text),
                Segment::Value(Placeholder::FileList) => command.push_str(params.file_list),
                Segment::Value(Placeholder::NumBaseModThreads) => {
                    command.push_str(&params.num_base_mod_threads.to_string())
                },
            }
        }
        command
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        },
        _ => false,
    }
}

impl FromStr for CommandTemplate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
