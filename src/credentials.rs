//! Username/password resolution, including the interactive prompt.

use std::fmt;
use std::io::{self, BufRead, Write};

use console::Term;

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A source of input that is read without echo.
pub trait ReadSecret {
    fn read_secret(&mut self) -> io::Result<String>;
}

/// Reads secrets from the controlling terminal.
///
/// Bound to stderr so the prompt still works when stdout is redirected.
pub struct TerminalSecret {
    term: Term,
}

impl TerminalSecret {
    pub fn new() -> Self {
        TerminalSecret {
            term: Term::stderr(),
        }
    }
}

impl Default for TerminalSecret {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadSecret for TerminalSecret {
    fn read_secret(&mut self) -> io::Result<String> {
        // console hands back an empty line instead of failing when there is no tty
        if !self.term.is_term() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "password input requires an interactive terminal",
            ));
        }
        self.term.read_secure_line()
    }
}

/// Interactive credential prompt. Empty answers keep the current value.
pub struct Prompter<R, W, S> {
    input: R,
    output: W,
    secret: S,
}

impl Prompter<io::StdinLock<'static>, io::Stdout, TerminalSecret> {
    pub fn terminal() -> Self {
        Prompter::new(io::stdin().lock(), io::stdout(), TerminalSecret::new())
    }
}

impl<R: BufRead, W: Write, S: ReadSecret> Prompter<R, W, S> {
    pub fn new(input: R, output: W, secret: S) -> Self {
        Prompter {
            input,
            output,
            secret,
        }
    }

    pub fn prompt(&mut self, username: &mut String, password: &mut String) -> io::Result<()> {
        if username.is_empty() {
            write!(self.output, "username: ")?;
        } else {
            write!(self.output, "username [{}]: ", username)?;
        }
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "input closed before a username was entered",
            ));
        }
        replace_unless_blank(username, &line);

        if password.is_empty() {
            write!(self.output, "password: ")?;
        } else {
            write!(self.output, "password [*]: ")?;
        }
        self.output.flush()?;

        let secret = self.secret.read_secret()?;
        replace_unless_blank(password, &secret);
        Ok(())
    }

    pub fn prompt_credentials(&mut self, credentials: &mut Credentials) -> io::Result<()> {
        let Credentials { username, password } = credentials;
        self.prompt(username, password)
    }
}

fn replace_unless_blank(current: &mut String, entered: &str) {
    let entered = entered.trim();
    if !entered.is_empty() {
        *current = entered.to_string();
    }
}
