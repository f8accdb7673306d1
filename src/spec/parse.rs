// src/spec/parse.rs

//! Parser for the textual spec syntax
//!
//! ```text
//! spec    := node (ws* '^' dep)*
//! node    := name? attr*
//! attr    := '@' versions | '+' ident | '~' ident | '%' ident ('@' versions)?
//!          | key '=' value
//! dep     := ('[' 'deptypes=' list ']')? ws* ( '(' spec ')' | node )
//! ```
//!
//! Attributes may be separated by whitespace. `arch`, `platform`, `os`
//! and `target` keys set architecture fields; every other key is a
//! variant. A variant value item may be double-quoted to carry spaces,
//! commas or parentheses: `dev_path="/src/my zlib"`.

use super::{DepTypes, DependencySpec, Spec};
use crate::compiler::CompilerConstraint;
use crate::error::{Error, Result};
use crate::variant::VariantValue;
use crate::version::VersionConstraint;

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_version_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | ',' | '=' | '-' | '_')
}

fn is_value_char(c: char) -> bool {
    !c.is_whitespace() && c != ')' && c != '^'
}

pub(crate) struct SpecParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> SpecParser<'a> {
    pub(crate) fn parse(input: &'a str) -> Result<Spec> {
        let mut parser = Self { input, pos: 0 };
        parser.skip_ws();
        if parser.at_end() {
            return Err(Error::ParseError("empty spec".to_string()));
        }
        let spec = parser.spec()?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(parser.error("unexpected input"));
        }
        Ok(spec)
    }

    fn error(&self, what: &str) -> Error {
        Error::ParseError(format!(
            "{} at position {} in '{}'",
            what, self.pos, self.input
        ))
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let input = self.input;
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
        &input[start..self.pos]
    }

    fn ident(&mut self, what: &str) -> Result<&'a str> {
        let ident = self.take_while(is_ident_char);
        if ident.is_empty() {
            return Err(self.error(&format!("expected {}", what)));
        }
        Ok(ident)
    }

    /// Raw text of a `key=value` value; quoted sections may hold any character
    fn value(&mut self) -> Result<&'a str> {
        let input = self.input;
        let start = self.pos;
        let mut quoted = false;
        while let Some(c) = self.peek() {
            if quoted {
                match c {
                    '\\' => self.bump(),
                    '"' => quoted = false,
                    _ => {}
                }
            } else if c == '"' {
                quoted = true;
            } else if !is_value_char(c) {
                break;
            }
            self.bump();
        }
        if quoted {
            return Err(self.error("unterminated quote"));
        }
        Ok(&input[start..self.pos])
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.peek() == Some(c) {
            self.bump();
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c)))
        }
    }

    fn spec(&mut self) -> Result<Spec> {
        let mut spec = self.node()?;
        loop {
            let save = self.pos;
            self.skip_ws();
            if self.peek() == Some('^') {
                self.bump();
                let dep = self.dependency()?;
                spec.dependencies.push(dep);
            } else {
                self.pos = save;
                break;
            }
        }
        Ok(spec)
    }

    fn dependency(&mut self) -> Result<DependencySpec> {
        self.skip_ws();
        let mut deptypes = DepTypes::empty();
        if self.peek() == Some('[') {
            self.bump();
            self.skip_ws();
            let key = self.ident("'deptypes'")?;
            if key != "deptypes" {
                return Err(self.error(&format!("unknown edge attribute '{}'", key)));
            }
            self.expect('=')?;
            let list = self.take_while(|c| c.is_ascii_alphabetic() || c == ',');
            deptypes = DepTypes::parse(list)?;
            self.skip_ws();
            self.expect(']')?;
            self.skip_ws();
        }

        let spec = if self.peek() == Some('(') {
            self.bump();
            self.skip_ws();
            let inner = self.spec()?;
            self.skip_ws();
            self.expect(')')?;
            inner
        } else {
            self.node()?
        };

        if spec.name.is_none() {
            return Err(self.error("dependency must name a package"));
        }
        Ok(DependencySpec { deptypes, spec })
    }

    fn node(&mut self) -> Result<Spec> {
        let mut spec = Spec::default();

        if self.peek().is_some_and(is_ident_char) {
            let save = self.pos;
            let name = self.take_while(is_ident_char);
            if self.peek() == Some('=') {
                self.pos = save;
            } else {
                spec.name = Some(name.to_string());
            }
        }

        loop {
            let save = self.pos;
            self.skip_ws();
            match self.peek() {
                Some('@') => {
                    self.bump();
                    let text = self.take_while(is_version_char);
                    if !spec.versions.is_any() {
                        return Err(self.error("version given twice"));
                    }
                    spec.versions = VersionConstraint::parse(text)?;
                    if spec.versions.is_any() {
                        return Err(self.error("expected a version after '@'"));
                    }
                }
                Some(c @ ('+' | '~')) => {
                    self.bump();
                    let name = self.ident("variant name")?;
                    self.set_variant(&mut spec, name, VariantValue::Bool(c == '+'))?;
                }
                Some('%') => {
                    self.bump();
                    self.skip_ws();
                    let name = self.ident("compiler name")?;
                    let mut text = name.to_string();
                    if self.peek() == Some('@') {
                        self.bump();
                        text.push('@');
                        text.push_str(self.take_while(is_version_char));
                    }
                    if spec.compiler.is_some() {
                        return Err(self.error("compiler given twice"));
                    }
                    spec.compiler = Some(CompilerConstraint::parse(&text)?);
                }
                Some(c) if is_ident_char(c) => {
                    let key = self.take_while(is_ident_char);
                    if self.peek() != Some('=') {
                        // another package name: not part of this node
                        self.pos = save;
                        break;
                    }
                    self.bump();
                    let value = self.value()?;
                    if value.is_empty() {
                        return Err(self.error(&format!("missing value for '{}'", key)));
                    }
                    match key {
                        "arch" => spec.arch.set_arch(value)?,
                        "platform" | "os" | "target" => spec.arch.set(key, value)?,
                        _ => {
                            let parsed = VariantValue::parse(value).map_err(|e| self.error(&e))?;
                            self.set_variant(&mut spec, key, parsed)?;
                        }
                    }
                }
                _ => {
                    self.pos = save;
                    break;
                }
            }
        }

        Ok(spec)
    }

    fn set_variant(&self, spec: &mut Spec, name: &str, value: VariantValue) -> Result<()> {
        if spec.variants.insert(name.to_string(), value).is_some() {
            return Err(self.error(&format!("variant '{}' given twice", name)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::DepType;

    #[test]
    fn test_parse_name_only() {
        let spec = Spec::parse("zlib").unwrap();
        assert_eq!(spec.name(), Some("zlib"));
        assert!(spec.is_unconstrained_node());
    }

    #[test]
    fn test_parse_compact_attributes() {
        let spec = Spec::parse("zlib@1.2:+shared~pic%gcc@9:").unwrap();
        assert_eq!(spec.versions.to_string(), "1.2:");
        assert_eq!(spec.variants["shared"], VariantValue::Bool(true));
        assert_eq!(spec.variants["pic"], VariantValue::Bool(false));
        assert_eq!(spec.compiler.as_ref().unwrap().to_string(), "gcc@9:");
    }

    #[test]
    fn test_parse_spaced_attributes() {
        let spec = Spec::parse("hdf5 @1.14 +mpi build_type=Release languages=c,fortran %gcc arch=linux-rhel8-zen3")
            .unwrap();
        assert_eq!(spec.name(), Some("hdf5"));
        assert_eq!(spec.variants["build_type"], VariantValue::single("Release"));
        assert_eq!(spec.variants["languages"].to_string(), "c,fortran");
        assert_eq!(spec.arch.os.as_deref(), Some("rhel8"));
    }

    #[test]
    fn test_parse_dependencies() {
        let spec = Spec::parse("app ^[deptypes=build] cmake@3.20: ^(libfoo +shared ^zlib@1.2)").unwrap();
        assert_eq!(spec.dependencies.len(), 2);
        let cmake = &spec.dependencies[0];
        assert_eq!(cmake.spec.name(), Some("cmake"));
        assert!(cmake.deptypes.contains(DepType::Build));
        assert!(!cmake.deptypes.contains(DepType::Link));
        let libfoo = &spec.dependencies[1];
        assert!(libfoo.deptypes.is_empty());
        assert_eq!(libfoo.spec.dependencies[0].spec.name(), Some("zlib"));
    }

    #[test]
    fn test_parse_anonymous() {
        let spec = Spec::parse("+shared").unwrap();
        assert!(spec.name().is_none());
        let spec = Spec::parse("build_type=Debug %clang").unwrap();
        assert!(spec.name().is_none());
        assert!(Spec::parse_named("+shared").is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(Spec::parse("").is_err());
        assert!(Spec::parse("zlib@").is_err());
        assert!(Spec::parse("zlib@1.2@1.3").is_err());
        assert!(Spec::parse("zlib +shared ~shared").is_err());
        assert!(Spec::parse("zlib bzip2").is_err());
        assert!(Spec::parse("zlib ^").is_err());
        assert!(Spec::parse("zlib ^(cmake").is_err());
        assert!(Spec::parse("zlib ^[kind=build] cmake").is_err());
        assert!(Spec::parse("zlib arch=linux-x86_64").is_err());
        assert!(Spec::parse("zlib %gcc %clang").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for text in [
            "zlib",
            "zlib@1.2: +shared",
            "hdf5@1.14 +mpi build_type=Release %gcc@12.2.0 arch=linux-rhel8-zen3",
            "app ^[deptypes=build] cmake@3.20: ^(libfoo +shared ^zlib@1.2)",
            "+shared target=x86_64",
        ] {
            let spec = Spec::parse(text).unwrap();
            let printed = spec.to_string();
            assert_eq!(Spec::parse(&printed).unwrap(), spec, "round trip of {}", text);
        }
    }

    #[test]
    fn test_dev_path_value_keeps_path() {
        let spec = Spec::parse("zlib dev_path=/home/me/src/zlib-1.2 ^cmake").unwrap();
        assert_eq!(
            spec.variants["dev_path"],
            VariantValue::single("/home/me/src/zlib-1.2")
        );
        assert_eq!(spec.dependencies.len(), 1);
    }

    #[test]
    fn test_quoted_dev_path_round_trip() {
        for path in ["/tmp/my src", "/tmp/a,b", "/tmp/x)y", "/tmp/q\"uote ^dep"] {
            let mut spec = Spec::named("zlib");
            spec.variants
                .insert("dev_path".to_string(), VariantValue::single(path));
            spec.dependencies.push(DependencySpec {
                deptypes: DepTypes::empty(),
                spec: Spec::named("cmake"),
            });
            let printed = spec.to_string();
            let reparsed = Spec::parse(&printed).unwrap();
            assert_eq!(reparsed, spec, "round trip of {}", printed);
            assert_eq!(reparsed.variants["dev_path"].as_single(), Some(path));
        }
        assert!(Spec::parse("zlib dev_path=\"/tmp/open").is_err());
    }
}
