//! The directory stack behind `cd`, `pushd`, `popd`, `dirs`, and the
//! `cdh` directory history.

use crate::{
    error::{Error, Result},
    types::Str,
};
use std::{env, path::PathBuf};

pub struct DirectoryStack {
    stack: Vec<PathBuf>,
    /// Distinct directories visited, most recent last; `cdh` offers them
    /// back by number.
    history: Vec<PathBuf>,
}

impl Default for DirectoryStack {
    fn default() -> Self {
        let current = env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        DirectoryStack { stack: vec![current.clone()], history: vec![current] }
    }
}

impl DirectoryStack {
    pub fn current(&self) -> &PathBuf { self.stack.last().expect("stack is never empty") }

    fn change_to(&mut self, target: PathBuf) -> Result<PathBuf> {
        let previous = env::current_dir().unwrap_or_else(|_| self.current().clone());
        env::set_current_dir(&target).map_err(|source| Error::OpenFailure {
            path: target.display().to_string(),
            source,
        })?;
        let resolved = env::current_dir().unwrap_or(target);
        env::set_var("OLDPWD", &previous);
        env::set_var("PWD", &resolved);
        self.history.retain(|dir| dir != &resolved);
        self.history.push(resolved.clone());
        if self.history.len() > 32 {
            self.history.remove(0);
        }
        Ok(resolved)
    }

    /// `cd` semantics: no argument goes home, `-` goes to `OLDPWD`.
    pub fn cd(&mut self, target: Option<&str>) -> Result<PathBuf> {
        let target = match target {
            None => PathBuf::from(env::var("HOME").unwrap_or_else(|_| "/".into())),
            Some("-") => PathBuf::from(env::var("OLDPWD").unwrap_or_else(|_| ".".into())),
            Some(path) => PathBuf::from(path),
        };
        let resolved = self.change_to(target)?;
        *self.stack.last_mut().expect("stack is never empty") = resolved.clone();
        Ok(resolved)
    }

    pub fn pushd(&mut self, target: &str) -> Result<PathBuf> {
        let resolved = self.change_to(PathBuf::from(target))?;
        self.stack.push(resolved.clone());
        Ok(resolved)
    }

    pub fn popd(&mut self) -> Result<PathBuf> {
        if self.stack.len() < 2 {
            return Err(Error::EvaluatedSyntax {
                message:  "popd: directory stack empty".into(),
                position: None,
            });
        }
        self.stack.pop();
        let target = self.current().clone();
        self.change_to(target)
    }

    pub fn dirs(&self) -> impl DoubleEndedIterator<Item = &PathBuf> { self.stack.iter().rev() }

    pub fn recent(&self) -> impl DoubleEndedIterator<Item = &PathBuf> {
        self.history.iter().rev()
    }

    /// Re-enters the n-th most recent directory (1-based, as `cdh` counts
    /// them).
    pub fn cd_history(&mut self, index: usize) -> Result<PathBuf> {
        let target = self
            .history
            .iter()
            .rev()
            .nth(index.saturating_sub(1))
            .cloned()
            .ok_or_else(|| Error::EvaluatedSyntax {
                message:  format!("cdh: no history entry {}", index),
                position: None,
            })?;
        let resolved = self.change_to(target)?;
        *self.stack.last_mut().expect("stack is never empty") = resolved.clone();
        Ok(resolved)
    }

    pub fn to_strings(&self) -> Vec<Str> {
        self.dirs().map(|dir| dir.display().to_string()).collect()
    }
}
