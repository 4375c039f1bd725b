//! Effect source directives.
//!
//! An effect file is WGSL plus a few top-level directives the shader compiler
//! never sees:
//!
//! ```text
//! technique bloom <quality = "high";> {
//!     pass extract <target = ":lastpass"; blend = true;> {
//!         vertex = vs_main;
//!         fragment = fs_extract;
//!         profile = glsl330;
//!     }
//! }
//!
//! texture src = ":thisframe";
//! global time = "fx_time";
//! ```
//!
//! Directives are only recognised at the start of a top-level item. They are
//! blanked out of the returned shader text, newlines kept, so compiler
//! diagnostics still point at the right lines.

use fxlayer_core::{Profile, ShaderStage};
use thiserror::Error;

use crate::pass::MAX_TARGETS;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{line}:{column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Parsed effect file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectSource {
    /// WGSL with the directives blanked out.
    pub shader: String,
    pub techniques: Vec<TechniqueDecl>,
    /// `texture UNIFORM = "TEXTURE";`
    pub textures: Vec<Binding>,
    /// `global UNIFORM = "PARAMETER";`
    pub globals: Vec<Binding>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TechniqueDecl {
    pub name: String,
    pub annotations: Vec<(String, String)>,
    pub passes: Vec<PassDecl>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassDecl {
    pub name: String,
    /// Annotations other than targets.
    pub annotations: Vec<(String, String)>,
    /// `(slot, texture name)` from `target`/`target0`..`target3`.
    pub targets: Vec<(usize, String)>,
    /// Entry point per stage, in declaration order.
    pub stages: Vec<(ShaderStage, String)>,
    pub profile: Option<Profile>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub uniform: String,
    pub value: String,
    pub line: usize,
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Number(String),
    Punct(char),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    start: usize,
    end: usize,
    line: usize,
    column: usize,
}

struct Lexer<'a> {
    source: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    line: usize,
    line_start: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().collect(),
            pos: 0,
            line: 1,
            line_start: 0,
        }
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).map(|&(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|&(i, _)| i)
            .unwrap_or(self.source.len())
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = *self.chars.get(self.pos)?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.line_start = self.pos;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            line: self.line,
            column: self.pos - self.line_start + 1,
            message: message.into(),
        }
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match (self.peek(0), self.peek(1)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while !matches!(self.peek(0), None | Some('\n')) {
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    let opened = self.error("unterminated block comment");
                    self.bump();
                    self.bump();
                    // WGSL block comments nest.
                    let mut depth = 1;
                    while depth > 0 {
                        match (self.peek(0), self.peek(1)) {
                            (None, _) => return Err(opened),
                            (Some('/'), Some('*')) => {
                                self.bump();
                                self.bump();
                                depth += 1;
                            }
                            (Some('*'), Some('/')) => {
                                self.bump();
                                self.bump();
                                depth -= 1;
                            }
                            _ => {
                                self.bump();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let Some(c) = self.peek(0) else {
                return Ok(tokens);
            };
            let start = self.offset();
            let line = self.line;
            let column = self.pos - self.line_start + 1;

            let tok = if c == '"' {
                let opened = self.error("unterminated string");
                self.bump();
                let mut text = String::new();
                loop {
                    match self.bump() {
                        None | Some('\n') => return Err(opened),
                        Some('"') => break,
                        Some('\\') => match self.bump() {
                            Some(escaped) => text.push(escaped),
                            None => return Err(opened),
                        },
                        Some(other) => text.push(other),
                    }
                }
                Tok::Str(text)
            } else if c.is_alphabetic() || c == '_' {
                let mut word = String::new();
                while let Some(c) = self.peek(0).filter(|c| c.is_alphanumeric() || *c == '_') {
                    word.push(c);
                    self.bump();
                }
                Tok::Ident(word)
            } else if c.is_ascii_digit() {
                let mut number = String::new();
                while let Some(c) = self
                    .peek(0)
                    .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '_')
                {
                    number.push(c);
                    self.bump();
                }
                Tok::Number(number)
            } else {
                self.bump();
                Tok::Punct(c)
            };

            tokens.push(Token {
                tok,
                start,
                end: self.offset(),
                line,
                column,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Directive parser
// ---------------------------------------------------------------------------

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn error_at(&self, token: Option<&Token>, message: impl Into<String>) -> ParseError {
        let (line, column) = token
            .or_else(|| self.tokens.last())
            .map(|t| (t.line, t.column))
            .unwrap_or((1, 1));
        ParseError {
            line,
            column,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn expect_punct(&mut self, expected: char) -> Result<(), ParseError> {
        match self.next() {
            Some(Token { tok: Tok::Punct(c), .. }) if *c == expected => Ok(()),
            other => Err(self.error_at(other, format!("expected `{expected}`"))),
        }
    }

    fn eat_punct(&mut self, expected: char) -> bool {
        if matches!(self.peek(), Some(Token { tok: Tok::Punct(c), .. }) if *c == expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.next() {
            Some(Token { tok: Tok::Ident(word), .. }) => Ok(word.clone()),
            other => Err(self.error_at(other, format!("expected {what}"))),
        }
    }

    fn expect_string(&mut self, what: &str) -> Result<String, ParseError> {
        match self.next() {
            Some(Token { tok: Tok::Str(text), .. }) => Ok(text.clone()),
            other => Err(self.error_at(other, format!("expected quoted {what}"))),
        }
    }

    /// Identifier, string, or (optionally negative) number.
    fn expect_value(&mut self) -> Result<String, ParseError> {
        let negative = self.eat_punct('-');
        match self.next() {
            Some(Token { tok: Tok::Number(n), .. }) if negative => Ok(format!("-{n}")),
            Some(Token { tok: Tok::Number(n), .. }) => Ok(n.clone()),
            Some(Token { tok: Tok::Ident(v) | Tok::Str(v), .. }) if !negative => Ok(v.clone()),
            other => Err(self.error_at(other, "expected a value")),
        }
    }

    /// `< key = value; ... >`, if present.
    fn annotations(&mut self) -> Result<Vec<(String, String)>, ParseError> {
        let mut annotations = Vec::new();
        if !self.eat_punct('<') {
            return Ok(annotations);
        }
        while !self.eat_punct('>') {
            let key = self.expect_ident("annotation name")?;
            self.expect_punct('=')?;
            let value = self.expect_value()?;
            annotations.push((key, value));
            if !self.eat_punct(';') && !matches!(self.peek(), Some(Token { tok: Tok::Punct('>'), .. })) {
                return Err(self.error_at(self.peek(), "expected `;` or `>`"));
            }
        }
        Ok(annotations)
    }

    fn technique(&mut self) -> Result<TechniqueDecl, ParseError> {
        let line = self.next().map(|t| t.line).unwrap_or(1);
        let name = self.expect_ident("technique name")?;
        let annotations = self.annotations()?;
        self.expect_punct('{')?;

        let mut passes: Vec<PassDecl> = Vec::new();
        while !self.eat_punct('}') {
            let keyword = self.next();
            match keyword {
                Some(Token { tok: Tok::Ident(word), .. }) if word == "pass" => {}
                other => return Err(self.error_at(other, "expected `pass` or `}`")),
            }
            let pass = self.pass(keyword.map(|t| t.line).unwrap_or(line))?;
            if passes.iter().any(|p| p.name == pass.name) {
                return Err(self.error_at(keyword, format!("duplicate pass {}", pass.name)));
            }
            passes.push(pass);
        }
        self.eat_punct(';');

        Ok(TechniqueDecl {
            name,
            annotations,
            passes,
            line,
        })
    }

    fn pass(&mut self, line: usize) -> Result<PassDecl, ParseError> {
        let name = self.expect_ident("pass name")?;
        let mut targets = Vec::new();
        let mut annotations = Vec::new();
        for (key, value) in self.annotations()? {
            match target_slot(&key) {
                Some(slot) => targets.push((slot, value)),
                None => annotations.push((key, value)),
            }
        }
        self.expect_punct('{')?;

        let mut stages: Vec<(ShaderStage, String)> = Vec::new();
        let mut profile = None;
        while !self.eat_punct('}') {
            let key_token = self.peek();
            let key = self.expect_ident("stage or `profile`")?;
            self.expect_punct('=')?;
            let value = self.expect_value()?;
            self.expect_punct(';')?;

            if key == "profile" {
                let parsed = value
                    .parse::<Profile>()
                    .map_err(|_| self.error_at(key_token, format!("unknown profile {value}")))?;
                profile = Some(parsed);
            } else if let Some(stage) = ShaderStage::from_keyword(&key) {
                if stages.iter().any(|(s, _)| *s == stage) {
                    return Err(self.error_at(key_token, format!("{stage} declared twice")));
                }
                stages.push((stage, value));
            } else {
                return Err(self.error_at(key_token, format!("unknown pass key {key}")));
            }
        }

        Ok(PassDecl {
            name,
            annotations,
            targets,
            stages,
            profile,
            line,
        })
    }

    /// `KEYWORD UNIFORM = "VALUE";`
    fn binding(&mut self, what: &str) -> Result<Binding, ParseError> {
        let line = self.next().map(|t| t.line).unwrap_or(1);
        let uniform = self.expect_ident("uniform name")?;
        self.expect_punct('=')?;
        let value = self.expect_string(what)?;
        self.expect_punct(';')?;
        Ok(Binding { uniform, value, line })
    }
}

fn target_slot(key: &str) -> Option<usize> {
    let rest = key.strip_prefix("target")?;
    if rest.is_empty() {
        return Some(0);
    }
    rest.parse::<usize>().ok().filter(|&slot| slot < MAX_TARGETS)
}

/// Split an effect file into shader text and directives.
pub fn parse(source: &str) -> Result<EffectSource, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
    };
    let mut effect = EffectSource::default();
    let mut blanks: Vec<(usize, usize)> = Vec::new();

    let mut depth = 0usize;
    let mut item_start = true;
    while let Some(token) = parser.peek() {
        if depth == 0 && item_start {
            if let Tok::Ident(word) = &token.tok {
                let start = token.start;
                let handled = match word.as_str() {
                    "technique" => {
                        let technique = parser.technique()?;
                        if effect.techniques.iter().any(|t| t.name == technique.name) {
                            return Err(parser.error_at(Some(token), format!("duplicate technique {}", technique.name)));
                        }
                        effect.techniques.push(technique);
                        true
                    }
                    "texture" => {
                        let binding = parser.binding("texture name")?;
                        effect.textures.push(binding);
                        true
                    }
                    "global" => {
                        let binding = parser.binding("parameter name")?;
                        effect.globals.push(binding);
                        true
                    }
                    _ => false,
                };
                if handled {
                    let end = tokens[parser.pos - 1].end;
                    blanks.push((start, end));
                    continue;
                }
            }
        }

        parser.pos += 1;
        match token.tok {
            Tok::Punct('{') => depth += 1,
            Tok::Punct('}') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| parser.error_at(Some(token), "unbalanced `}`"))?;
            }
            _ => {}
        }
        item_start = depth == 0 && matches!(token.tok, Tok::Punct(';') | Tok::Punct('}'));
    }

    effect.shader = blank_out(source, &blanks);
    Ok(effect)
}

fn blank_out(source: &str, blanks: &[(usize, usize)]) -> String {
    source
        .char_indices()
        .map(|(i, c)| {
            let hidden = blanks.iter().any(|&(start, end)| i >= start && i < end);
            if hidden && c != '\n' && c != '\r' {
                ' '
            } else {
                c
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EFFECT: &str = r#"// header comment mentioning technique foo { }
@group(0) @binding(0) var<uniform> time: f32;

technique bloom <quality = "high"; passes = 2> {
    pass extract <target = ":lastpass"; blend = true;> {
        vertex = vs_main;
        fragment = fs_extract;
        profile = glsl330;
    }
    pass combine <target1 = "scratch"; scale = -0.5> {
        fragment = fs_combine;
    }
}

/* texture nope = "x"; */
texture src = ":thisframe";
global time = "fx_time";

@fragment
fn fs_extract() -> @location(0) vec4<f32> {
    let texture = 1.0;
    return vec4<f32>(texture * time);
}
"#;

    #[test]
    fn parses_directives() {
        let effect = parse(EFFECT).unwrap();
        assert_eq!(effect.techniques.len(), 1);

        let technique = &effect.techniques[0];
        assert_eq!(technique.name, "bloom");
        assert_eq!(technique.line, 4);
        assert_eq!(
            technique.annotations,
            vec![("quality".into(), "high".into()), ("passes".into(), "2".into())]
        );

        let extract = &technique.passes[0];
        assert_eq!(extract.targets, vec![(0, ":lastpass".to_string())]);
        assert_eq!(extract.annotations, vec![("blend".into(), "true".into())]);
        assert_eq!(
            extract.stages,
            vec![
                (ShaderStage::Vertex, "vs_main".to_string()),
                (ShaderStage::Fragment, "fs_extract".to_string())
            ]
        );
        assert_eq!(extract.profile, Some(Profile::Glsl(330)));

        let combine = &technique.passes[1];
        assert_eq!(combine.targets, vec![(1, "scratch".to_string())]);
        assert_eq!(combine.annotations, vec![("scale".into(), "-0.5".into())]);
        assert_eq!(combine.profile, None);

        assert_eq!(effect.textures.len(), 1);
        assert_eq!(effect.textures[0].uniform, "src");
        assert_eq!(effect.textures[0].value, ":thisframe");
        assert_eq!(effect.globals[0].value, "fx_time");
    }

    #[test]
    fn directives_are_blanked_keeping_lines() {
        let effect = parse(EFFECT).unwrap();
        assert_eq!(effect.shader.lines().count(), EFFECT.lines().count());
        assert!(!effect.shader.contains("technique bloom"));
        assert!(!effect.shader.contains("fx_time"));
        // Comments and ordinary WGSL are left alone.
        assert!(effect.shader.contains("technique foo"));
        assert!(effect.shader.contains("/* texture nope = \"x\"; */"));
        assert!(effect.shader.contains("let texture = 1.0;"));
        assert!(effect.shader.contains("var<uniform> time: f32;"));
    }

    #[test]
    fn reports_positions() {
        let err = parse("technique t {\n    pass p {\n        pixel = main;\n    }\n}\n").unwrap_err();
        assert_eq!((err.line, err.column), (3, 9));
        assert!(err.message.contains("pixel"));

        let err = parse("technique t {\n    pass p {\n        fragment = fs;\n").unwrap_err();
        assert!(err.message.contains("expected"));

        let err = parse("fn f() {}\n}\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn rejects_bad_profiles_and_duplicates() {
        assert!(parse("technique t { pass p { fragment = f; profile = hlsl5; } }").is_err());
        assert!(parse("technique t { pass p { fragment = f; fragment = g; } }").is_err());
        assert!(parse("technique t { pass p { fragment = f; } pass p { fragment = g; } }").is_err());
        assert!(parse("technique t { pass p { fragment = f; } }\ntechnique t { pass q { fragment = f; } }").is_err());
    }

    #[test]
    fn unterminated_input() {
        assert!(parse("/* open").is_err());
        assert!(parse("texture src = \":lastpass;").is_err());
    }

    #[test]
    fn target_slots() {
        assert_eq!(target_slot("target"), Some(0));
        assert_eq!(target_slot("target3"), Some(3));
        assert_eq!(target_slot("target4"), None);
        assert_eq!(target_slot("targets"), None);
    }
}
