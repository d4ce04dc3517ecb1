//! Lightweight lexer and outline for static script analysis.
//!
//! This is not a full parser. It understands enough of Rhai (and the
//! Python-flavored snippets models often produce) to enumerate imports,
//! call sites and string literals without executing anything. Anything it
//! cannot tokenize, or any unbalanced bracket, is a [`ScriptParseError`].

use std::collections::{HashMap, HashSet};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Number,
    /// `::`
    PathSep,
    Punct(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ScriptParseError {
    pub line: usize,
    pub message: String,
}

impl ScriptParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

const fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    tokens: Vec<Token>,
    open: Vec<(char, usize)>,
}

impl Lexer {
    fn new(source: &str, first_line: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: first_line,
            tokens: Vec::new(),
            open: Vec::new(),
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, kind: TokenKind, line: usize) {
        self.tokens.push(Token { kind, line });
    }

    fn run(mut self) -> Result<Vec<Token>, ScriptParseError> {
        while let Some(c) = self.peek(0) {
            match c {
                '\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                c if c.is_whitespace() => self.pos += 1,
                '/' if self.peek(1) == Some('/') => self.skip_line(),
                '/' if self.peek(1) == Some('*') => self.skip_block_comment()?,
                '#' if self.peek(1) == Some('{') => {
                    self.push(TokenKind::Punct('#'), self.line);
                    self.pos += 1;
                }
                // Python-style comment (and shebang lines)
                '#' => self.skip_line(),
                '"' | '\'' => self.string(c)?,
                '`' => self.template()?,
                ':' if self.peek(1) == Some(':') => {
                    self.push(TokenKind::PathSep, self.line);
                    self.pos += 2;
                }
                c if c.is_ascii_digit() => self.number(),
                c if c.is_alphabetic() || c == '_' => self.ident(),
                '(' | '[' | '{' => {
                    self.open.push((c, self.line));
                    self.push(TokenKind::Punct(c), self.line);
                    self.pos += 1;
                }
                ')' | ']' | '}' => {
                    match self.open.pop() {
                        Some((open, _)) if closing_for(open) == c => {}
                        Some((open, line)) => {
                            return Err(ScriptParseError::new(
                                self.line,
                                format!("'{c}' does not close '{open}' opened on line {line}"),
                            ));
                        }
                        None => {
                            return Err(ScriptParseError::new(
                                self.line,
                                format!("unmatched '{c}'"),
                            ));
                        }
                    }
                    self.push(TokenKind::Punct(c), self.line);
                    self.pos += 1;
                }
                _ => {
                    self.push(TokenKind::Punct(c), self.line);
                    self.pos += 1;
                }
            }
        }

        if let Some((open, line)) = self.open.pop() {
            return Err(ScriptParseError::new(
                line,
                format!("'{open}' is never closed"),
            ));
        }
        Ok(self.tokens)
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), ScriptParseError> {
        let start = self.line;
        let mut depth = 0usize;
        loop {
            match (self.peek(0), self.peek(1)) {
                (Some('/'), Some('*')) => {
                    depth += 1;
                    self.pos += 2;
                }
                (Some('*'), Some('/')) => {
                    depth -= 1;
                    self.pos += 2;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                (Some(c), _) => {
                    if c == '\n' {
                        self.line += 1;
                    }
                    self.pos += 1;
                }
                (None, _) => {
                    return Err(ScriptParseError::new(start, "unterminated block comment"));
                }
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<(), ScriptParseError> {
        let start = self.line;
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut text = String::new();
        loop {
            let Some(c) = self.peek(0) else {
                return Err(ScriptParseError::new(start, "unterminated string literal"));
            };
            match c {
                '\\' => {
                    if let Some(escaped) = self.peek(1) {
                        if escaped == '\n' {
                            self.line += 1;
                        }
                        text.push(escaped);
                    }
                    self.pos += 2;
                }
                c if c == quote && !triple => {
                    self.pos += 1;
                    break;
                }
                c if c == quote && self.peek(1) == Some(quote) && self.peek(2) == Some(quote) => {
                    self.pos += 3;
                    break;
                }
                '\n' if !triple => {
                    return Err(ScriptParseError::new(start, "unterminated string literal"));
                }
                c => {
                    if c == '\n' {
                        self.line += 1;
                    }
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
        self.push(TokenKind::Str(text), start);
        Ok(())
    }

    /// Backtick template string; `${...}` interpolations are lexed as code.
    fn template(&mut self) -> Result<(), ScriptParseError> {
        let start = self.line;
        self.pos += 1;
        let mut text = String::new();
        loop {
            let Some(c) = self.peek(0) else {
                return Err(ScriptParseError::new(start, "unterminated template string"));
            };
            match c {
                '`' => {
                    self.pos += 1;
                    break;
                }
                '$' if self.peek(1) == Some('{') => {
                    self.pos += 2;
                    let code_line = self.line;
                    let code = self.interpolation(start)?;
                    let inner = Lexer::new(&code, code_line).run()?;
                    self.tokens.extend(inner);
                }
                c => {
                    if c == '\n' {
                        self.line += 1;
                    }
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
        self.push(TokenKind::Str(text), start);
        Ok(())
    }

    fn interpolation(&mut self, start: usize) -> Result<String, ScriptParseError> {
        let mut depth = 1usize;
        let mut code = String::new();
        while let Some(c) = self.peek(0) {
            self.pos += 1;
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(code);
                    }
                }
                '\n' => self.line += 1,
                _ => {}
            }
            code.push(c);
        }
        Err(ScriptParseError::new(start, "unterminated interpolation"))
    }

    fn number(&mut self) {
        let line = self.line;
        while let Some(c) = self.peek(0) {
            let fractional_dot =
                c == '.' && self.peek(1).is_some_and(|next| next.is_ascii_digit());
            if c.is_ascii_alphanumeric() || c == '_' || fractional_dot {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.push(TokenKind::Number, line);
    }

    fn ident(&mut self) {
        let line = self.line;
        let mut name = String::new();
        while let Some(c) = self.peek(0) {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        self.push(TokenKind::Ident(name), line);
    }
}

/// Split `source` into tokens, failing on unterminated literals or
/// unbalanced brackets.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ScriptParseError> {
    Lexer::new(source, 1).run()
}

/// An imported module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub module: String,
    pub line: usize,
}

/// A call site, with its receiver path normalized to dots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// Full dotted path, e.g. `os.system` or `bpy.ops.mesh.delete`.
    pub path: String,
    /// Final segment, e.g. `system`.
    pub name: String,
    /// Everything before `name`, if any.
    pub receiver: Option<String>,
    pub line: usize,
}

impl CallSite {
    pub fn receiver_root(&self) -> Option<&str> {
        self.receiver
            .as_deref()
            .and_then(|receiver| receiver.split('.').next())
    }
}

/// What static analysis needs to know about a script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutline {
    pub imports: Vec<ImportRef>,
    pub calls: Vec<CallSite>,
    pub strings: Vec<(String, usize)>,
    /// Functions the script declares itself.
    pub functions: Vec<String>,
    /// Lines of imports whose module path is computed at run time.
    pub dynamic_imports: Vec<usize>,
}

const NON_CALL_KEYWORDS: &[&str] = &[
    "if", "else", "while", "for", "loop", "do", "until", "switch", "return", "in", "and", "or",
    "not", "let", "const", "throw", "try", "catch", "elif", "with", "lambda", "assert", "yield",
    "import",
];

fn ident(token: Option<&Token>) -> Option<&str> {
    match token.map(|t| &t.kind) {
        Some(TokenKind::Ident(name)) => Some(name),
        _ => None,
    }
}

fn is_punct(token: Option<&Token>, c: char) -> bool {
    matches!(token.map(|t| &t.kind), Some(TokenKind::Punct(p)) if *p == c)
}

fn is_member_sep(token: Option<&Token>) -> bool {
    matches!(
        token.map(|t| &t.kind),
        Some(TokenKind::PathSep | TokenKind::Punct('.'))
    )
}

/// Tokenize and outline `source`.
pub fn outline(source: &str) -> Result<ScriptOutline, ScriptParseError> {
    let tokens = tokenize(source)?;
    let mut outline = ScriptOutline::default();
    let mut aliases: HashMap<String, String> = HashMap::new();
    let variables = declared_variables(&tokens);

    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        match &token.kind {
            TokenKind::Str(text) => outline.strings.push((text.clone(), token.line)),
            TokenKind::Ident(word) if word == "import" => {
                i = read_import(&tokens, i + 1, &variables, &mut outline, &mut aliases);
                continue;
            }
            TokenKind::Ident(word) if word == "from" => {
                // `from pkg import a, b`: only `pkg` is a module.
                let (module, next) = read_dotted(&tokens, i + 1);
                if let Some(module) = module {
                    outline.imports.push(ImportRef {
                        module,
                        line: token.line,
                    });
                }
                i = next;
                if ident(tokens.get(i)) == Some("import") {
                    i += 1;
                    while ident(tokens.get(i)).is_some() {
                        i += 1;
                        if ident(tokens.get(i)) == Some("as") {
                            i += 2;
                        }
                        if is_punct(tokens.get(i), ',') {
                            i += 1;
                        } else {
                            break;
                        }
                    }
                }
                continue;
            }
            TokenKind::Punct('(') => {
                if let Some(call) = call_before(&tokens, i, &aliases) {
                    if ident(i.checked_sub(2).and_then(|j| tokens.get(j))) == Some("fn") {
                        outline.functions.push(call.name);
                    } else {
                        outline.calls.push(call);
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }

    Ok(outline)
}

/// Read `a.b.c` starting at `start`; returns the path and the next index.
fn read_dotted(tokens: &[Token], start: usize) -> (Option<String>, usize) {
    let mut parts = Vec::new();
    let mut i = start;
    while let Some(name) = ident(tokens.get(i)) {
        parts.push(name.to_string());
        i += 1;
        if is_member_sep(tokens.get(i)) && ident(tokens.get(i + 1)).is_some() {
            i += 1;
        } else {
            break;
        }
    }
    if parts.is_empty() {
        (None, i)
    } else {
        (Some(parts.join(".")), i)
    }
}

/// Names bound by `let`, `const`, `for` or a function parameter list.
fn declared_variables(tokens: &[Token]) -> HashSet<String> {
    let mut names = HashSet::new();
    for (i, token) in tokens.iter().enumerate() {
        match &token.kind {
            TokenKind::Ident(word) if matches!(word.as_str(), "let" | "const" | "for") => {
                if let Some(name) = ident(tokens.get(i + 1)) {
                    names.insert(name.to_string());
                }
            }
            TokenKind::Ident(word) if word == "fn" && is_punct(tokens.get(i + 2), '(') => {
                let mut j = i + 3;
                while let Some(param) = ident(tokens.get(j)) {
                    names.insert(param.to_string());
                    if is_punct(tokens.get(j + 1), ',') {
                        j += 2;
                    } else {
                        break;
                    }
                }
            }
            _ => {}
        }
    }
    names
}

/// True when the token after an import operand ends it: `as`, `,`, `;`,
/// end of input or a new line.
fn ends_import_operand(tokens: &[Token], i: usize, line: usize) -> bool {
    match tokens.get(i) {
        None => true,
        Some(token) if token.line != line => true,
        Some(token) => {
            ident(Some(token)) == Some("as") || is_punct(Some(token), ',') || is_punct(Some(token), ';')
        }
    }
}

/// Handles `import "path" as alias;` and `import a.b, c as d`.
///
/// An operand that is not a plain string literal or module name, or that
/// names a script variable, is recorded in `dynamic_imports`.
fn read_import(
    tokens: &[Token],
    start: usize,
    variables: &HashSet<String>,
    outline: &mut ScriptOutline,
    aliases: &mut HashMap<String, String>,
) -> usize {
    let line = tokens.get(start.saturating_sub(1)).map_or(1, |t| t.line);
    let mut i = start;
    loop {
        let (module, computed) = match tokens.get(i).map(|t| &t.kind) {
            Some(TokenKind::Str(path)) => {
                i += 1;
                (Some(path.clone()), false)
            }
            _ => {
                let (module, next) = read_dotted(tokens, i);
                i = next;
                let computed = module.as_deref().is_some_and(|m| {
                    variables.contains(m.split('.').next().unwrap_or(m))
                });
                (module, computed)
            }
        };
        let Some(module) = module else {
            if tokens.get(i).is_some() && !is_punct(tokens.get(i), ';') {
                outline.dynamic_imports.push(line);
            }
            return i;
        };
        let operand_line = tokens.get(i.saturating_sub(1)).map_or(line, |t| t.line);
        if computed || !ends_import_operand(tokens, i, operand_line) {
            outline.dynamic_imports.push(line);
            return i;
        }

        if ident(tokens.get(i)) == Some("as") {
            if let Some(alias) = ident(tokens.get(i + 1)) {
                aliases.insert(alias.to_string(), module.clone());
                i += 2;
            }
        }
        outline.imports.push(ImportRef { module, line });

        if is_punct(tokens.get(i), ',') {
            i += 1;
        } else {
            return i;
        }
    }
}

/// Build the call site whose argument list opens at `paren`.
fn call_before(
    tokens: &[Token],
    paren: usize,
    aliases: &HashMap<String, String>,
) -> Option<CallSite> {
    let name_index = paren.checked_sub(1)?;
    let name = ident(tokens.get(name_index))?;
    if NON_CALL_KEYWORDS.contains(&name) {
        return None;
    }
    let line = tokens[name_index].line;

    let mut parts = vec![name.to_string()];
    let mut j = name_index;
    while j >= 2 && is_member_sep(tokens.get(j - 1)) {
        match ident(tokens.get(j - 2)) {
            Some(part) => {
                parts.push(part.to_string());
                j -= 2;
            }
            None => break,
        }
    }
    parts.reverse();

    if let Some(target) = aliases.get(&parts[0]) {
        parts[0].clone_from(target);
    }

    let path = parts.join(".");
    let receiver = (parts.len() > 1).then(|| parts[..parts.len() - 1].join("."));
    Some(CallSite {
        path,
        name: name.to_string(),
        receiver,
        line,
    })
}
