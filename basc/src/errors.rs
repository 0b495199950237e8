use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Level {
    Info,
    Warning,
    Error,
}

/// One compiler or assembler diagnostic.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub level: Level,
    pub line: i32,
    pub text: String,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level = match self.level {
            Level::Info => "INFO ",
            Level::Warning => "WARN ",
            Level::Error => "ERROR",
        };
        write!(f, "{}: line {} - {}", level, self.line, self.text)
    }
}

/// Ordered list of diagnostics collected across compilation and assembly.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Errors {
    messages: Vec<Message>,
}

impl Errors {
    pub fn new() -> Errors {
        Errors::default()
    }

    pub fn add(&mut self, other: &Errors) {
        self.messages.extend(other.messages.iter().cloned());
    }

    pub fn add_error<S: Into<String>>(&mut self, line: i32, text: S) {
        self.messages.push(Message {
            level: Level::Error,
            line,
            text: text.into(),
        });
    }

    pub fn add_warning<S: Into<String>>(&mut self, line: i32, text: S) {
        self.messages.push(Message {
            level: Level::Warning,
            line,
            text: text.into(),
        });
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages[..]
    }

    pub fn errors(&self) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.level == Level::Error)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.level == Level::Warning)
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.level == Level::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
