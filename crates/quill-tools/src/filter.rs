use regex::Regex;
use serde::{Deserialize, Serialize};

/// Filtering mode for the command filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Only commands matching a whitelist pattern pass.
    #[default]
    Whitelist,
    /// Everything passes except blacklisted commands.
    Blacklist,
    /// Everything passes the filter, but the caller must confirm interactively.
    Prompt,
    /// No filtering applied.
    Disabled,
}

/// Verdict on a single command string. Computed fresh per check, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCheck {
    pub allowed: bool,
    pub reason: Option<String>,
    pub matched_rule: Option<String>,
    pub mode: FilterMode,
}

impl CommandCheck {
    fn allow(mode: FilterMode) -> Self {
        Self {
            allowed: true,
            reason: None,
            matched_rule: None,
            mode,
        }
    }

    fn deny(mode: FilterMode, reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            matched_rule: None,
            mode,
        }
    }
}

/// Pattern-based allow/deny predicate over shell command strings.
///
/// Patterns support exact text and `*` globbing; all other regex
/// metacharacters are treated literally. A pattern must match at the start of
/// the command and be followed by whitespace, a pipe, redirect, `&`, `;`, or
/// end-of-string, so a whitelist entry for `ls` never matches `lsblk`.
#[derive(Debug, Clone)]
pub struct CommandFilter {
    whitelist: Vec<(String, Regex)>,
    blacklist: Vec<(String, Regex)>,
    mode: FilterMode,
}

impl CommandFilter {
    #[must_use]
    pub fn new(whitelist: &[String], blacklist: &[String], mode: FilterMode) -> Self {
        Self {
            whitelist: compile_patterns(whitelist),
            blacklist: compile_patterns(blacklist),
            mode,
        }
    }

    #[must_use]
    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    /// Check a command against the configured rules.
    ///
    /// Blacklist is consulted before whitelist in every mode, so a
    /// blacklisted pattern always wins even when the command is whitelisted.
    #[must_use]
    pub fn check_command(&self, command: &str) -> CommandCheck {
        if self.mode == FilterMode::Disabled {
            return CommandCheck::allow(self.mode);
        }

        let base_command = match split_command(command) {
            Ok(tokens) => match tokens.into_iter().next() {
                Some(first) => first,
                None => return CommandCheck::deny(self.mode, "empty command".into()),
            },
            Err(SplitError::UnbalancedQuote) => {
                return CommandCheck::deny(self.mode, "invalid command syntax".into());
            }
        };

        for (pattern, regex) in &self.blacklist {
            if regex.is_match(command) {
                return CommandCheck {
                    allowed: false,
                    reason: Some(format!("command matches blacklist pattern: {pattern}")),
                    matched_rule: Some(pattern.clone()),
                    mode: self.mode,
                };
            }
        }

        match self.mode {
            FilterMode::Whitelist => {
                for (pattern, regex) in &self.whitelist {
                    if regex.is_match(command) {
                        return CommandCheck {
                            allowed: true,
                            reason: None,
                            matched_rule: Some(pattern.clone()),
                            mode: self.mode,
                        };
                    }
                }
                CommandCheck::deny(
                    self.mode,
                    format!("command '{base_command}' not in whitelist"),
                )
            }
            FilterMode::Blacklist | FilterMode::Prompt => CommandCheck::allow(self.mode),
            FilterMode::Disabled => unreachable!("handled above"),
        }
    }

    pub fn add_to_whitelist(&mut self, pattern: &str) {
        if !self.whitelist.iter().any(|(p, _)| p == pattern) {
            self.whitelist.push((pattern.to_owned(), compile(pattern)));
        }
    }

    pub fn add_to_blacklist(&mut self, pattern: &str) {
        if !self.blacklist.iter().any(|(p, _)| p == pattern) {
            self.blacklist.push((pattern.to_owned(), compile(pattern)));
        }
    }

    pub fn remove_from_whitelist(&mut self, pattern: &str) -> bool {
        let before = self.whitelist.len();
        self.whitelist.retain(|(p, _)| p != pattern);
        self.whitelist.len() < before
    }

    pub fn remove_from_blacklist(&mut self, pattern: &str) -> bool {
        let before = self.blacklist.len();
        self.blacklist.retain(|(p, _)| p != pattern);
        self.blacklist.len() < before
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<(String, Regex)> {
    patterns
        .iter()
        .map(|p| (p.clone(), compile(p)))
        .collect()
}

/// Compile a command pattern to an anchored regex. `*` is the only wildcard;
/// every other metacharacter matches literally.
fn compile(pattern: &str) -> Regex {
    let mut escaped = String::with_capacity(pattern.len() * 2);
    for ch in pattern.chars() {
        match ch {
            '*' => escaped.push_str(".*"),
            '.' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '\\' | '|' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    let anchored = format!("^{escaped}(?:\\s|$|\\||>|<|&|;)");
    // The pattern is fully escaped above, so compilation cannot fail.
    Regex::new(&anchored).unwrap_or_else(|_| Regex::new("$^").expect("never-match regex"))
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SplitError {
    UnbalancedQuote,
}

/// Quote-aware whitespace tokenizer. Rejects unbalanced quotes so that
/// syntactically broken commands fail closed before any pattern check.
pub(crate) fn split_command(command: &str) -> Result<Vec<String>, SplitError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = command.chars();

    while let Some(ch) = chars.next() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                } else {
                    current.push(ch);
                }
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    in_token = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                        in_token = true;
                    }
                }
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                c => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }

    if quote.is_some() {
        return Err(SplitError::UnbalancedQuote);
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
