use std::path::PathBuf;

use super::lexer::{tokenize, Token};
use crate::error::{Error, Result};

/// One command of a pipeline with its redirections already stripped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stage {
    pub words: Vec<String>,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    pub background: bool,
}

impl Pipeline {
    /// The lone command of a single-stage pipeline.
    pub fn simple(&self) -> Option<&Stage> {
        match self.stages.as_slice() {
            [stage] => Some(stage),
            _ => None,
        }
    }

    /// The command the shell may run in its own process: a lone foreground
    /// stage without redirections.
    pub fn shell_stage(&self) -> Option<&Stage> {
        self.simple()
            .filter(|s| !self.background && s.input.is_none() && s.output.is_none())
    }
}

/// Parses a command line. Blank lines yield `None`.
///
/// A stage that ends up without words is kept so that the spawner can
/// reject the whole pipeline.
pub fn parse_cmd(line: &str) -> Result<Option<Pipeline>> {
    let mut tokens = tokenize(line);
    if tokens.is_empty() {
        return Ok(None);
    }
    let background = tokens.last() == Some(&Token::Background);
    if background {
        tokens.pop();
    }

    let mut pipeline = Pipeline {
        stages: Vec::new(),
        background,
    };
    let mut stage = Stage::default();
    let mut redirected = false;
    let mut tokens = tokens.into_iter();
    while let Some(tok) = tokens.next() {
        match tok {
            Token::Word(w) if redirected => {
                return Err(Error::Syntax(format!(
                    "unexpected `{}` after redirection",
                    w
                )))
            }
            Token::Word(w) => stage.words.push(w),
            Token::Input | Token::Output => {
                let path = match tokens.next() {
                    Some(Token::Word(p)) => PathBuf::from(p),
                    Some(other) => {
                        return Err(Error::Syntax(format!("unexpected `{}`", other)))
                    }
                    None => return Err(Error::Syntax(format!("missing file after `{}`", tok))),
                };
                if tok == Token::Input {
                    stage.input = Some(path);
                } else {
                    stage.output = Some(path);
                }
                redirected = true;
            }
            Token::Pipe => {
                pipeline.stages.push(std::mem::take(&mut stage));
                redirected = false;
            }
            other => return Err(Error::Syntax(format!("`{}` is not supported", other))),
        }
    }
    pipeline.stages.push(stage);
    Ok(Some(pipeline))
}
