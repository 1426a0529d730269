//! KIR parser implementation.

use crate::core::error::{CompileError, CompileResult};
use crate::ir::{Graph, NodeId, NodeKind, Stamp, StampKind};
use hashbrown::HashMap;

/// Parse every graph in `text`.
pub fn parse_graphs(text: &str) -> CompileResult<Vec<Graph>> {
    let mut parser = Parser::new(text);
    let mut graphs = Vec::new();
    parser.skip_whitespace(true);
    while !parser.is_eof() {
        graphs.push(parser.parse_graph()?);
        parser.skip_whitespace(true);
    }
    Ok(graphs)
}

/// Parse a text holding exactly one graph.
pub fn parse_graph(text: &str) -> CompileResult<Graph> {
    let mut graphs = parse_graphs(text)?;
    match graphs.len() {
        1 => Ok(graphs.remove(0)),
        n => Err(CompileError::Parse {
            line: 1,
            reason: format!("expected exactly one graph, found {n}"),
        }),
    }
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    graph: Graph,
    values: HashMap<&'a str, NodeId>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            graph: Graph::new(""),
            values: HashMap::new(),
        }
    }

    fn error<T>(&self, reason: impl Into<String>) -> CompileResult<T> {
        let line = self.text[..self.pos.min(self.text.len())]
            .bytes()
            .filter(|&b| b == b'\n')
            .count()
            + 1;
        Err(CompileError::Parse {
            line,
            reason: reason.into(),
        })
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn skip_whitespace(&mut self, skip_newlines: bool) {
        while let Some(ch) = self.current_char() {
            if ch == ';' {
                while let Some(ch) = self.current_char() {
                    if ch == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else if ch.is_whitespace() {
                if ch == '\n' && !skip_newlines {
                    break;
                }
                self.advance();
            } else {
                break;
            }
        }
    }

    fn try_read(&mut self, ch: char) -> bool {
        self.skip_whitespace(true);
        if self.current_char() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> CompileResult<()> {
        if !self.try_read(ch) {
            return self.error(format!("expected '{}' but found {:?}", ch, self.current_char()));
        }
        Ok(())
    }

    fn read_identifier(&mut self) -> CompileResult<&'a str> {
        self.skip_whitespace(true);
        let start = self.pos;
        match self.current_char() {
            Some(ch) if ch.is_alphabetic() || ch == '_' => {}
            Some(ch) => return self.error(format!("expected identifier but found '{ch}'")),
            None => return self.error("expected identifier but found end of input"),
        }
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' || ch == '.' {
                self.advance();
            } else {
                break;
            }
        }
        Ok(&self.text[start..self.pos])
    }

    fn expect_keyword(&mut self, keyword: &str) -> CompileResult<()> {
        let ident = self.read_identifier()?;
        if ident != keyword {
            return self.error(format!("expected '{keyword}' but found '{ident}'"));
        }
        Ok(())
    }

    fn read_value_name(&mut self) -> CompileResult<&'a str> {
        self.expect('%')?;
        self.read_identifier()
    }

    fn read_number(&mut self) -> CompileResult<i64> {
        self.skip_whitespace(true);
        let start = self.pos;
        let negative = self.try_read('-');
        let digits_start = self.pos;
        let rest = &self.text[self.pos..];
        let (radix, skip) = if rest.starts_with("0x") || rest.starts_with("0X") {
            (16, 2)
        } else {
            (10, 0)
        };
        self.pos += skip;
        let body_start = self.pos;
        while let Some(ch) = self.current_char() {
            if ch.is_digit(radix) {
                self.advance();
            } else {
                break;
            }
        }
        if self.pos == body_start {
            self.pos = start;
            return self.error("expected a number");
        }
        let body = &self.text[body_start..self.pos];
        let magnitude = match u64::from_str_radix(body, radix) {
            Ok(v) => v,
            Err(e) => return self.error(format!("invalid number '{}': {e}", &self.text[digits_start..self.pos])),
        };
        Ok(if negative {
            (magnitude as i64).wrapping_neg()
        } else {
            magnitude as i64
        })
    }

    fn read_kind(&mut self) -> CompileResult<StampKind> {
        let name = self.read_identifier()?;
        match StampKind::from_name(name) {
            Some(kind) => Ok(kind),
            None => self.error(format!("unknown type '{name}'")),
        }
    }

    /// `i32`, `i32[lo, hi]` or `i32[empty]`.
    fn read_stamp(&mut self) -> CompileResult<Stamp> {
        let kind = self.read_kind()?;
        if kind == StampKind::Void {
            return Ok(Stamp::void());
        }
        if !self.try_read('[') {
            return Ok(Stamp::unrestricted(kind));
        }
        self.skip_whitespace(true);
        if self.current_char().is_some_and(char::is_alphabetic) {
            self.expect_keyword("empty")?;
            self.expect(']')?;
            return Ok(Stamp::empty(kind));
        }
        let lo = self.read_number()?;
        self.expect(',')?;
        let hi = self.read_number()?;
        self.expect(']')?;
        Ok(Stamp::range(kind, lo, hi))
    }

    fn read_operand(&mut self) -> CompileResult<NodeId> {
        let name = self.read_value_name()?;
        match self.values.get(name) {
            Some(&id) => Ok(id),
            None => self.error(format!("use of undefined value %{name}")),
        }
    }

    fn define(&mut self, name: &'a str, id: NodeId) -> CompileResult<()> {
        if self.values.insert(name, id).is_some() {
            return self.error(format!("value %{name} defined twice"));
        }
        Ok(())
    }

    fn parse_graph(&mut self) -> CompileResult<Graph> {
        self.expect_keyword("graph")?;
        let name = self.read_identifier()?;
        self.graph = Graph::new(name);
        self.values.clear();

        self.expect('(')?;
        let mut index = 0;
        if !self.try_read(')') {
            loop {
                let param = self.read_value_name()?;
                self.expect(':')?;
                let stamp = self.read_stamp()?;
                let id = self.graph.add_param(index, stamp)?;
                self.define(param, id)?;
                index += 1;
                if self.try_read(')') {
                    break;
                }
                self.expect(',')?;
            }
        }

        self.expect('{')?;
        let start = self.graph.start();
        self.parse_block(Some(start))?;
        log::trace!("parsed graph {} with {} nodes", name, self.graph.node_count());
        Ok(std::mem::replace(&mut self.graph, Graph::new("")))
    }

    /// Parse statements up to the closing brace. `tail` is the fixed node
    /// whose successor slot is still open; it becomes `None` once the chain
    /// ends in a return or a split.
    fn parse_block(&mut self, mut tail: Option<NodeId>) -> CompileResult<()> {
        loop {
            if self.try_read('}') {
                return Ok(());
            }
            if self.is_eof() {
                return self.error("unexpected end of input inside a block");
            }
            self.skip_whitespace(true);
            if self.current_char() == Some('%') {
                self.parse_definition(&mut tail)?;
                continue;
            }
            let keyword = self.read_identifier()?;
            let node = match keyword {
                "write" => {
                    let addr = self.read_operand()?;
                    self.expect(',')?;
                    let value = self.read_operand()?;
                    self.graph.add_node(NodeKind::Write, &[addr, value], Stamp::void())?
                }
                "begin" => self.graph.add_node(NodeKind::Begin, &[], Stamp::void())?,
                "return" => {
                    self.skip_whitespace(false);
                    let inputs = if self.current_char() == Some('%') {
                        vec![self.read_operand()?]
                    } else {
                        Vec::new()
                    };
                    self.graph.add_node(NodeKind::Return, &inputs, Stamp::void())?
                }
                "if" => {
                    let condition = self.read_operand()?;
                    self.graph.add_node(NodeKind::If, &[condition], Stamp::void())?
                }
                other => return self.error(format!("unknown statement '{other}'")),
            };
            tail = self.link(tail, node)?;
            if self.graph.kind(node) == Some(NodeKind::If) {
                for slot in 0..2 {
                    if slot == 1 {
                        self.expect_keyword("else")?;
                    }
                    self.expect('{')?;
                    let begin = self.graph.add_node(NodeKind::Begin, &[], Stamp::void())?;
                    self.graph.set_successor(node, slot, begin)?;
                    self.parse_block(Some(begin))?;
                }
                tail = None;
            }
        }
    }

    fn link(&mut self, tail: Option<NodeId>, node: NodeId) -> CompileResult<Option<NodeId>> {
        let Some(pred) = tail else {
            return self.error("statement after the end of the control chain");
        };
        self.graph.set_successor(pred, 0, node)?;
        let slots = self.graph.node(node)?.successors().len();
        Ok((slots == 1).then_some(node))
    }

    fn parse_definition(&mut self, tail: &mut Option<NodeId>) -> CompileResult<()> {
        let name = self.read_value_name()?;
        self.expect('=')?;
        let op = self.read_identifier()?;
        let kind = match op {
            "add" => Some(NodeKind::Add),
            "sub" => Some(NodeKind::Sub),
            "mul" => Some(NodeKind::Mul),
            "mulhi" => Some(NodeKind::MulHigh),
            "and" => Some(NodeKind::And),
            "or" => Some(NodeKind::Or),
            "xor" => Some(NodeKind::Xor),
            "address" => Some(NodeKind::Address),
            "lt" => Some(NodeKind::IntegerLessThan),
            "eq" => Some(NodeKind::IntegerEquals),
            _ => None,
        };
        let id = if let Some(kind) = kind {
            let x = self.read_operand()?;
            self.expect(',')?;
            let y = self.read_operand()?;
            self.graph.add_value(kind, &[x, y])?
        } else {
            match op {
                "const" => {
                    let kind = self.read_kind()?;
                    let value = self.read_number()?;
                    self.graph.unique_constant(kind, value)
                }
                "neg" | "not" | "sext" => {
                    let x = self.read_operand()?;
                    let kind = match op {
                        "neg" => NodeKind::Neg,
                        "not" => NodeKind::Not,
                        _ => NodeKind::SignExtend,
                    };
                    self.graph.add_value(kind, &[x])?
                }
                "narrow" => {
                    let x = self.read_operand()?;
                    self.expect(',')?;
                    let lo = self.read_number()?;
                    self.expect(',')?;
                    let hi = self.read_number()?;
                    self.graph.add_value(NodeKind::Narrow { lo, hi }, &[x])?
                }
                "read" => {
                    let stamp = self.read_stamp()?;
                    let addr = self.read_operand()?;
                    let read = self.graph.add_node(NodeKind::Read, &[addr], stamp)?;
                    *tail = self.link(*tail, read)?;
                    read
                }
                other => return self.error(format!("unknown operation '{other}'")),
            }
        };
        self.define(name, id)
    }
}
