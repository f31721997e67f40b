//! Prompt expansion. `PROMPT` may use backslash escapes for the working
//! directory, user, host, and literal control characters.

use whelk_shell::Shell;

const DEFAULT_PROMPT: &str = "whelk:\\w$ ";

fn hostname() -> String {
    let mut buffer = [0u8; 256];
    nix::unistd::gethostname(&mut buffer)
        .ok()
        .and_then(|name| name.to_str().ok().map(String::from))
        .unwrap_or_else(|| "localhost".into())
}

fn abbreviated_cwd() -> String {
    let cwd = std::env::current_dir()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|_| "?".into());
    match std::env::var("HOME") {
        Ok(home) if cwd.starts_with(&home) => format!("~{}", &cwd[home.len()..]),
        _ => cwd,
    }
}

pub fn expand_prompt(shell: &Shell) -> String {
    let template = shell.variable("PROMPT").map(|variable| variable.to_joined_string());
    let template = template
        .filter(|prompt| !prompt.is_empty())
        .unwrap_or_else(|| DEFAULT_PROMPT.into());

    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('w') => out.push_str(&abbreviated_cwd()),
            Some('W') => {
                let cwd = abbreviated_cwd();
                out.push_str(cwd.rsplit('/').next().unwrap_or(&cwd));
            }
            Some('u') => {
                out.push_str(&std::env::var("USER").unwrap_or_else(|_| "user".into()))
            }
            Some('h') => out.push_str(&hostname()),
            Some('$') => out.push(if nix::unistd::geteuid().is_root() { '#' } else { '$' }),
            Some('n') => out.push('\n'),
            Some('e') => out.push('\x1b'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
