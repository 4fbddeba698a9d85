pub mod ast;

use crate::lexer::Lexer;
use crate::syntax::token_category;
use crate::token::{SourceLocation, Token, TokenKind};
use ast::{AssignOp, BinaryOp, Expr, ExprKind, Stmt, StmtKind, UnaryOp};

/// Hard ceiling on top-level parse iterations; a parser that makes no
/// progress past this point is aborted instead of hanging.
const PARSE_ITERATION_LIMIT: usize = 10_000;

/// Outcome of a parse: always a finite statement list, plus the error flag
/// and the rendered diagnostics. A flagged outcome must not be executed.
#[derive(Debug)]
pub struct ParseResult {
    pub statements: Vec<Stmt>,
    pub had_error: bool,
    pub diagnostics: Vec<String>,
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    source: &'a str,
    current: Token<'a>,
    previous: Token<'a>,
    had_error: bool,
    diagnostics: Vec<String>,
}

pub fn parse_source(source: &str) -> ParseResult {
    Parser::new(source).parse()
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut lexer = Lexer::new(source);
        let first = lexer.next_token();
        let mut parser = Self {
            lexer,
            source,
            current: first,
            previous: Token::eof(SourceLocation::default()),
            had_error: false,
            diagnostics: Vec::new(),
        };
        if parser.current.kind == TokenKind::Error {
            let token = parser.current;
            parser.error(token, token.lexeme);
        }
        parser
    }

    pub fn parse(mut self) -> ParseResult {
        let mut statements = Vec::new();
        let mut iterations = 0;
        while self.current.kind != TokenKind::EndOfFile {
            iterations += 1;
            if iterations > PARSE_ITERATION_LIMIT {
                self.had_error = true;
                self.diagnostics
                    .push("Kesalahan Kritis: Parser terjebak dalam loop tak terbatas.".to_string());
                break;
            }

            let start = self.current;
            if let Some(stmt) = self.statement() {
                statements.push(stmt);
            }
            if self.current.kind == TokenKind::EndOfFile {
                break;
            }
            // No forward progress means the statement parser bailed without
            // consuming anything; skip to the next statement boundary.
            if self.current.location.offset == start.location.offset {
                self.synchronize();
            }
        }
        ParseResult {
            statements,
            had_error: self.had_error,
            diagnostics: self.diagnostics,
        }
    }

    // --- statements ---

    fn statement(&mut self) -> Option<Stmt> {
        if self.match_token(TokenKind::Function) {
            return self.function_statement();
        }
        if self.match_token(TokenKind::If) {
            return self.if_statement();
        }
        if self.match_token(TokenKind::While) {
            return self.while_statement();
        }
        if self.match_token(TokenKind::For) {
            return self.for_statement();
        }
        if self.match_token(TokenKind::Try) {
            return self.try_statement();
        }
        if self.match_token(TokenKind::Class) {
            return self.class_statement();
        }
        if self.match_token(TokenKind::Return) {
            return self.return_statement();
        }
        if self.match_token(TokenKind::Var) {
            return self.var_declaration(false);
        }
        if self.match_token(TokenKind::Const) {
            return self.var_declaration(true);
        }
        if self.match_token(TokenKind::LBrace) {
            let open = self.previous;
            let body = self.block_until(&[TokenKind::RBrace]);
            let _ = self.consume(TokenKind::RBrace, "Diharapkan '}' setelah blok");
            return Some(Stmt::new(StmtKind::Block(body), open.location));
        }
        if self.match_token(TokenKind::Do) {
            let keyword = self.previous;
            let body = self.block();
            let _ = self.consume(TokenKind::End, "Diharapkan 'tutup' setelah blok");
            return Some(Stmt::new(StmtKind::Block(body), keyword.location));
        }

        let start = self.current;
        let expr = self.expression()?;
        self.match_token(TokenKind::Semicolon);
        Some(Stmt::new(StmtKind::Expr(expr), start.location))
    }

    fn function_statement(&mut self) -> Option<Stmt> {
        let keyword = self.previous;
        let name = self.consume(TokenKind::Identifier, "Diharapkan nama fungsi")?;
        let name = name.lexeme.to_string();
        let params = self.parameter_list()?;

        let body_start = self.current;
        let body = self.block();
        let _ = self.consume(TokenKind::End, "Diharapkan 'tutup' setelah isi fungsi");

        Some(Stmt::new(
            StmtKind::Function {
                name,
                params,
                body: Box::new(Stmt::new(StmtKind::Block(body), body_start.location)),
            },
            keyword.location,
        ))
    }

    fn parameter_list(&mut self) -> Option<Vec<String>> {
        self.consume(TokenKind::LParen, "Diharapkan '(' setelah nama fungsi")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let param = self.consume(TokenKind::Identifier, "Diharapkan nama parameter")?;
                params.push(param.lexeme.to_string());
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "Diharapkan ')' setelah parameter")?;
        Some(params)
    }

    fn if_statement(&mut self) -> Option<Stmt> {
        let stmt = self.if_chain()?;
        let _ = self.consume(TokenKind::End, "Diharapkan 'tutup' setelah blok 'jika'");
        Some(stmt)
    }

    /// Parses one `jika`/`kalau` arm; `kalau` arms nest as the else branch
    /// and the single closing `tutup` is consumed by `if_statement`.
    fn if_chain(&mut self) -> Option<Stmt> {
        let keyword = self.previous;
        let condition = self.expression()?;
        let _ = self.consume(TokenKind::Then, "Diharapkan 'maka' setelah kondisi 'jika'");

        let then_start = self.current;
        let then_stmts = self.block();
        let then_branch = Box::new(Stmt::new(StmtKind::Block(then_stmts), then_start.location));

        let else_branch = if self.match_token(TokenKind::ElseIf) {
            Some(Box::new(self.if_chain()?))
        } else if self.match_token(TokenKind::Else) {
            let else_token = self.previous;
            let else_stmts = self.block();
            Some(Box::new(Stmt::new(
                StmtKind::Block(else_stmts),
                else_token.location,
            )))
        } else {
            None
        };

        Some(Stmt::new(
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            },
            keyword.location,
        ))
    }

    fn while_statement(&mut self) -> Option<Stmt> {
        let keyword = self.previous;
        let condition = self.expression()?;
        let _ = self.consume(TokenKind::Do, "Diharapkan 'lakukan' setelah kondisi 'selama'");
        let body_start = self.current;
        let body = self.block();
        let _ = self.consume(TokenKind::End, "Diharapkan 'tutup' setelah blok 'selama'");
        Some(Stmt::new(
            StmtKind::While {
                condition,
                body: Box::new(Stmt::new(StmtKind::Block(body), body_start.location)),
            },
            keyword.location,
        ))
    }

    fn for_statement(&mut self) -> Option<Stmt> {
        let keyword = self.previous;
        let var = self.consume(TokenKind::Identifier, "Diharapkan nama variabel setelah 'untuk'")?;
        let var = var.lexeme.to_string();
        self.consume(TokenKind::Equal, "Diharapkan '=' setelah nama variabel")?;
        let start = self.expression()?;
        self.consume(TokenKind::To, "Diharapkan 'ke' setelah nilai awal")?;
        let end = self.expression()?;
        let step = if self.match_token(TokenKind::Step) {
            Some(self.expression()?)
        } else {
            None
        };
        let _ = self.consume(TokenKind::Do, "Diharapkan 'lakukan' sebelum isi pengulangan");

        let body_start = self.current;
        let body = self.block();
        let _ = self.consume(TokenKind::End, "Diharapkan 'tutup' setelah pengulangan 'untuk'");
        Some(Stmt::new(
            StmtKind::For {
                var,
                start,
                end,
                step,
                body: Box::new(Stmt::new(StmtKind::Block(body), body_start.location)),
            },
            keyword.location,
        ))
    }

    fn try_statement(&mut self) -> Option<Stmt> {
        let keyword = self.previous;
        let body_start = self.current;
        let mut try_stmts = Vec::new();
        while !self.check(TokenKind::Catch)
            && !self.check(TokenKind::End)
            && !self.check(TokenKind::EndOfFile)
        {
            let start = self.current;
            if let Some(stmt) = self.statement() {
                try_stmts.push(stmt);
            }
            if self.current.location.offset == start.location.offset {
                self.synchronize();
            }
        }

        let mut catch_var = None;
        let mut catch_body = None;
        if self.match_token(TokenKind::Catch) {
            if self.check(TokenKind::Identifier) {
                let name = self.consume(TokenKind::Identifier, "Diharapkan nama variabel eksepsi")?;
                catch_var = Some(name.lexeme.to_string());
                self.match_token(TokenKind::Then);
            }
            let catch_start = self.current;
            let catch_stmts = self.block();
            catch_body = Some(Box::new(Stmt::new(
                StmtKind::Block(catch_stmts),
                catch_start.location,
            )));
        }

        let _ = self.consume(TokenKind::End, "Diharapkan 'tutup' setelah blok coba/tangkap");
        Some(Stmt::new(
            StmtKind::Try {
                body: Box::new(Stmt::new(StmtKind::Block(try_stmts), body_start.location)),
                catch_var,
                catch_body,
            },
            keyword.location,
        ))
    }

    fn class_statement(&mut self) -> Option<Stmt> {
        let keyword = self.previous;
        let name = self.consume(TokenKind::Identifier, "Diharapkan nama kelas")?;
        let name = name.lexeme.to_string();
        let _ = self.consume(TokenKind::Then, "Diharapkan 'maka' sebelum isi kelas");

        let mut methods = Vec::new();
        while !self.check(TokenKind::End) && !self.check(TokenKind::EndOfFile) {
            if self.match_token(TokenKind::Function) {
                if let Some(mut method) = self.function_statement() {
                    // The receiver is an ordinary first parameter.
                    if let StmtKind::Function { params, .. } = &mut method.kind {
                        params.insert(0, "self".to_string());
                    }
                    methods.push(method);
                }
            } else {
                self.advance();
            }
        }

        let _ = self.consume(TokenKind::End, "Diharapkan 'tutup' setelah isi kelas");
        Some(Stmt::new(StmtKind::Class { name, methods }, keyword.location))
    }

    fn return_statement(&mut self) -> Option<Stmt> {
        let keyword = self.previous;
        let value = if self.check(TokenKind::Semicolon)
            || self.check(TokenKind::End)
            || self.check(TokenKind::Else)
            || self.check(TokenKind::ElseIf)
            || self.check(TokenKind::Catch)
            || self.check(TokenKind::EndOfFile)
        {
            None
        } else {
            Some(self.expression()?)
        };
        self.match_token(TokenKind::Semicolon);
        Some(Stmt::new(StmtKind::Return { value }, keyword.location))
    }

    fn var_declaration(&mut self, is_const: bool) -> Option<Stmt> {
        let keyword = self.previous;
        let name = self.consume(TokenKind::Identifier, "Diharapkan nama variabel")?;
        let name = name.lexeme.to_string();
        let initializer = if self.match_token(TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        self.match_token(TokenKind::Semicolon);
        Some(Stmt::new(
            StmtKind::VarDecl {
                name,
                initializer,
                is_const,
            },
            keyword.location,
        ))
    }

    /// Statements up to a closing keyword (`tutup`, `sebaliknya`, `kalau`,
    /// `tangkap`) or EOF. The closer is left for the caller to consume.
    fn block(&mut self) -> Vec<Stmt> {
        self.block_until(&[
            TokenKind::End,
            TokenKind::Else,
            TokenKind::ElseIf,
            TokenKind::Catch,
        ])
    }

    fn block_until(&mut self, closers: &[TokenKind]) -> Vec<Stmt> {
        let mut statements = Vec::new();
        while !closers.contains(&self.current.kind) && !self.check(TokenKind::EndOfFile) {
            let start = self.current;
            if let Some(stmt) = self.statement() {
                statements.push(stmt);
            }
            if self.current.location.offset == start.location.offset {
                self.synchronize();
            }
        }
        statements
    }

    // --- expressions ---

    fn expression(&mut self) -> Option<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> Option<Expr> {
        let expr = self.logical_or()?;

        let op = match self.current.kind {
            TokenKind::Equal => Some(AssignOp::Assign),
            TokenKind::PlusEqual => Some(AssignOp::Add),
            TokenKind::MinusEqual => Some(AssignOp::Sub),
            TokenKind::StarEqual => Some(AssignOp::Mul),
            TokenKind::SlashEqual => Some(AssignOp::Div),
            TokenKind::PercentEqual => Some(AssignOp::Mod),
            _ => None,
        };
        let Some(op) = op else {
            return Some(expr);
        };

        self.advance();
        let op_token = self.previous;
        let value = self.assignment()?;

        if matches!(
            expr.kind,
            ExprKind::Variable(_) | ExprKind::Get { .. } | ExprKind::Index { .. }
        ) {
            return Some(Expr::new(
                ExprKind::Assign {
                    target: Box::new(expr),
                    op,
                    value: Box::new(value),
                },
                op_token.location,
            ));
        }
        self.error(op_token, "Lokasi penugasan tidak sah");
        None
    }

    fn logical_or(&mut self) -> Option<Expr> {
        let mut expr = self.logical_and()?;
        while self.match_token(TokenKind::Or) {
            let op_token = self.previous;
            let right = self.logical_and()?;
            expr = binary(expr, BinaryOp::Or, right, op_token.location);
        }
        Some(expr)
    }

    fn logical_and(&mut self) -> Option<Expr> {
        let mut expr = self.bitwise_or()?;
        while self.match_token(TokenKind::And) {
            let op_token = self.previous;
            let right = self.bitwise_or()?;
            expr = binary(expr, BinaryOp::And, right, op_token.location);
        }
        Some(expr)
    }

    fn bitwise_or(&mut self) -> Option<Expr> {
        let mut expr = self.bitwise_xor()?;
        while self.match_token(TokenKind::Pipe) {
            let op_token = self.previous;
            let right = self.bitwise_xor()?;
            expr = binary(expr, BinaryOp::BitOr, right, op_token.location);
        }
        Some(expr)
    }

    fn bitwise_xor(&mut self) -> Option<Expr> {
        let mut expr = self.bitwise_and()?;
        while self.match_token(TokenKind::Caret) {
            let op_token = self.previous;
            let right = self.bitwise_and()?;
            expr = binary(expr, BinaryOp::BitXor, right, op_token.location);
        }
        Some(expr)
    }

    fn bitwise_and(&mut self) -> Option<Expr> {
        let mut expr = self.equality()?;
        while self.match_token(TokenKind::Ampersand) {
            let op_token = self.previous;
            let right = self.equality()?;
            expr = binary(expr, BinaryOp::BitAnd, right, op_token.location);
        }
        Some(expr)
    }

    fn equality(&mut self) -> Option<Expr> {
        let mut expr = self.comparison()?;
        loop {
            let op = if self.match_token(TokenKind::EqualEqual) {
                BinaryOp::Equal
            } else if self.match_token(TokenKind::BangEqual) {
                BinaryOp::NotEqual
            } else {
                break;
            };
            let op_token = self.previous;
            let right = self.comparison()?;
            expr = binary(expr, op, right, op_token.location);
        }
        Some(expr)
    }

    fn comparison(&mut self) -> Option<Expr> {
        let mut expr = self.shift()?;
        loop {
            let op = if self.match_token(TokenKind::Less) {
                BinaryOp::Less
            } else if self.match_token(TokenKind::LessEqual) {
                BinaryOp::LessEqual
            } else if self.match_token(TokenKind::Greater) {
                BinaryOp::Greater
            } else if self.match_token(TokenKind::GreaterEqual) {
                BinaryOp::GreaterEqual
            } else {
                break;
            };
            let op_token = self.previous;
            let right = self.shift()?;
            expr = binary(expr, op, right, op_token.location);
        }
        Some(expr)
    }

    fn shift(&mut self) -> Option<Expr> {
        let mut expr = self.term()?;
        loop {
            let op = if self.match_token(TokenKind::LessLess) {
                BinaryOp::Shl
            } else if self.match_token(TokenKind::GreaterGreater) {
                BinaryOp::Shr
            } else {
                break;
            };
            let op_token = self.previous;
            let right = self.term()?;
            expr = binary(expr, op, right, op_token.location);
        }
        Some(expr)
    }

    fn term(&mut self) -> Option<Expr> {
        let mut expr = self.factor()?;
        loop {
            let op = if self.match_token(TokenKind::Plus) {
                BinaryOp::Add
            } else if self.match_token(TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            let op_token = self.previous;
            let right = self.factor()?;
            expr = binary(expr, op, right, op_token.location);
        }
        Some(expr)
    }

    fn factor(&mut self) -> Option<Expr> {
        let mut expr = self.unary()?;
        loop {
            let op = if self.match_token(TokenKind::Star) {
                BinaryOp::Mul
            } else if self.match_token(TokenKind::Slash) {
                BinaryOp::Div
            } else if self.match_token(TokenKind::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };
            let op_token = self.previous;
            let right = self.unary()?;
            expr = binary(expr, op, right, op_token.location);
        }
        Some(expr)
    }

    fn unary(&mut self) -> Option<Expr> {
        let op = if self.match_token(TokenKind::Minus) {
            Some(UnaryOp::Neg)
        } else if self.match_token(TokenKind::Bang) {
            Some(UnaryOp::Not)
        } else if self.match_token(TokenKind::Tilde) {
            Some(UnaryOp::BitNot)
        } else {
            None
        };
        if let Some(op) = op {
            let op_token = self.previous;
            let right = self.unary()?;
            return Some(Expr::new(
                ExprKind::Unary {
                    op,
                    right: Box::new(right),
                },
                op_token.location,
            ));
        }
        self.call()
    }

    fn call(&mut self) -> Option<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.match_token(TokenKind::LParen) {
                let open = self.previous;
                let mut args = Vec::new();
                if !self.check(TokenKind::RParen) {
                    loop {
                        args.push(self.expression()?);
                        if !self.match_token(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.consume(TokenKind::RParen, "Diharapkan ')'")?;
                expr = Expr::new(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    open.location,
                );
            } else if self.match_token(TokenKind::Dot) {
                let dot = self.previous;
                let name = self.consume(TokenKind::Identifier, "Diharapkan nama properti")?;
                expr = Expr::new(
                    ExprKind::Get {
                        object: Box::new(expr),
                        name: name.lexeme.to_string(),
                    },
                    dot.location,
                );
            } else if self.match_token(TokenKind::LBracket) {
                let open = self.previous;
                expr = self.index_or_slice(expr, open)?;
            } else {
                break;
            }
        }
        Some(expr)
    }

    fn index_or_slice(&mut self, object: Expr, open: Token<'a>) -> Option<Expr> {
        let expr = if self.match_token(TokenKind::Colon) {
            // [:end] and [:]
            let end = if self.check(TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.expression()?))
            };
            Expr::new(
                ExprKind::Slice {
                    object: Box::new(object),
                    start: None,
                    end,
                },
                open.location,
            )
        } else {
            let first = self.expression()?;
            if self.match_token(TokenKind::Colon) {
                // [start:] and [start:end]
                let end = if self.check(TokenKind::RBracket) {
                    None
                } else {
                    Some(Box::new(self.expression()?))
                };
                Expr::new(
                    ExprKind::Slice {
                        object: Box::new(object),
                        start: Some(Box::new(first)),
                        end,
                    },
                    open.location,
                )
            } else {
                Expr::new(
                    ExprKind::Index {
                        object: Box::new(object),
                        index: Box::new(first),
                    },
                    open.location,
                )
            }
        };
        self.consume(TokenKind::RBracket, "Diharapkan ']' setelah indeks")?;
        Some(expr)
    }

    fn primary(&mut self) -> Option<Expr> {
        if self.match_token(TokenKind::False) {
            return Some(Expr::new(ExprKind::Bool(false), self.previous.location));
        }
        if self.match_token(TokenKind::True) {
            return Some(Expr::new(ExprKind::Bool(true), self.previous.location));
        }
        if self.match_token(TokenKind::Nil) {
            return Some(Expr::new(ExprKind::Nil, self.previous.location));
        }
        if self.match_token(TokenKind::Number) {
            let token = self.previous;
            let Some(value) = parse_number(token.lexeme) else {
                self.error(token, "Angka tidak valid");
                return None;
            };
            return Some(Expr::new(ExprKind::Number(value), token.location));
        }
        if self.match_token(TokenKind::String) {
            let token = self.previous;
            let inner = &token.lexeme[1..token.lexeme.len() - 1];
            return Some(Expr::new(ExprKind::Str(inner.to_string()), token.location));
        }
        if self.match_token(TokenKind::Identifier) {
            let token = self.previous;
            return Some(Expr::new(
                ExprKind::Variable(token.lexeme.to_string()),
                token.location,
            ));
        }
        if self.match_token(TokenKind::LParen) {
            let expr = self.expression()?;
            self.consume(TokenKind::RParen, "Diharapkan ')'")?;
            return Some(expr);
        }
        if self.match_token(TokenKind::LBracket) {
            let open = self.previous;
            let mut elements = Vec::new();
            if !self.check(TokenKind::RBracket) {
                loop {
                    elements.push(self.expression()?);
                    if !self.match_token(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.consume(TokenKind::RBracket, "Diharapkan ']' setelah elemen array")?;
            return Some(Expr::new(ExprKind::Array { elements }, open.location));
        }
        if self.match_token(TokenKind::LBrace) {
            let open = self.previous;
            let mut entries = Vec::new();
            if !self.check(TokenKind::RBrace) {
                loop {
                    let key = self.consume(TokenKind::Identifier, "Diharapkan kunci objek")?;
                    let key = key.lexeme.to_string();
                    self.consume(TokenKind::Colon, "Diharapkan ':' setelah kunci")?;
                    let value = self.expression()?;
                    entries.push((key, value));
                    if !self.match_token(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.consume(TokenKind::RBrace, "Diharapkan '}' setelah isi objek")?;
            return Some(Expr::new(ExprKind::Object { entries }, open.location));
        }
        if self.match_token(TokenKind::Function) {
            return self.function_expression();
        }

        let token = self.current;
        self.error(token, "Diharapkan ekspresi");
        None
    }

    fn function_expression(&mut self) -> Option<Expr> {
        let keyword = self.previous;
        self.consume(TokenKind::LParen, "Diharapkan '(' setelah 'fungsi'")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let param = self.consume(TokenKind::Identifier, "Diharapkan nama parameter")?;
                params.push(param.lexeme.to_string());
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "Diharapkan ')' setelah parameter")?;

        let body_start = self.current;
        let body = self.block();
        let _ = self.consume(TokenKind::End, "Diharapkan 'tutup' setelah isi fungsi");
        Some(Expr::new(
            ExprKind::Function {
                params,
                body: Box::new(Stmt::new(StmtKind::Block(body), body_start.location)),
            },
            keyword.location,
        ))
    }

    // --- token plumbing ---

    fn advance(&mut self) -> Token<'a> {
        self.previous = self.current;
        self.current = self.lexer.next_token();
        if self.current.kind == TokenKind::Error {
            let token = self.current;
            self.error(token, token.lexeme);
        }
        self.previous
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        false
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Option<Token<'a>> {
        if self.check(kind) {
            return Some(self.advance());
        }
        let token = self.current;
        self.error(token, message);
        if self.current.kind != TokenKind::EndOfFile {
            self.synchronize();
        }
        None
    }

    /// Skips tokens until a statement boundary: just past a semicolon, at a
    /// statement-leading keyword, or EOF.
    fn synchronize(&mut self) {
        if self.current.kind == TokenKind::EndOfFile {
            return;
        }
        self.advance();
        while self.current.kind != TokenKind::EndOfFile {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Function
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Try
                | TokenKind::Return
                | TokenKind::Var
                | TokenKind::Const
                | TokenKind::Class
                | TokenKind::Do => return,
                _ => {}
            }
            self.advance();
        }
    }

    fn error(&mut self, token: Token<'a>, message: &str) {
        self.had_error = true;

        let found = token_category(token.kind, token.lexeme);
        let (line_text, column) = source_line_at(self.source, token.location.offset);

        let mut caret = String::from("  ");
        for c in line_text.chars().take(column) {
            caret.push(if c == '\t' { '\t' } else { ' ' });
        }
        for _ in 0..token.location.length.max(1) {
            caret.push('^');
        }

        self.diagnostics.push(format!(
            "[ERROR SINTAKS] Baris {}:{}\n  {}\n{}\n-> {}, ditemukan {}\n",
            token.location.line, token.location.offset, line_text, caret, message, found
        ));
    }
}

fn binary(left: Expr, op: BinaryOp, right: Expr, location: SourceLocation) -> Expr {
    Expr::new(
        ExprKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
        location,
    )
}

/// Extracts the source line containing `offset` and the column of `offset`
/// within it. Shared by the syntax and runtime diagnostic printers.
pub fn source_line_at(source: &str, offset: usize) -> (&str, usize) {
    let offset = offset.min(source.len());
    let start = source[..offset].rfind('\n').map_or(0, |i| i + 1);
    let end = source[offset..]
        .find('\n')
        .map_or(source.len(), |i| offset + i);
    (&source[start..end], offset - start)
}

/// Converts a number lexeme to its value: decimal with `_` separators,
/// fraction, exponent, or the `0x`/`0b`/`0o` radix forms.
fn parse_number(lexeme: &str) -> Option<f64> {
    let cleaned: String = lexeme.chars().filter(|&c| c != '_').collect();
    let radix = match cleaned.get(..2) {
        Some("0x") | Some("0X") => Some(16),
        Some("0b") | Some("0B") => Some(2),
        Some("0o") | Some("0O") => Some(8),
        _ => None,
    };
    if let Some(radix) = radix {
        let digits = &cleaned[2..];
        if digits.is_empty() {
            return None;
        }
        return i64::from_str_radix(digits, radix).ok().map(|v| v as f64);
    }
    cleaned.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn parse_ok(source: &str) -> Vec<Stmt> {
        let result = parse_source(source);
        assert!(
            !result.had_error,
            "unexpected diagnostics: {:?}",
            result.diagnostics
        );
        result.statements
    }

    #[test]
    fn parses_declaration_with_precedence() {
        let stmts = parse_ok("lokal x = 1 + 2 * 3");
        assert_eq!(stmts.len(), 1);
        let StmtKind::VarDecl {
            name, initializer, ..
        } = &stmts[0].kind
        else {
            panic!("expected var decl, got {:?}", stmts[0].kind);
        };
        assert_eq!(name, "x");
        // 1 + (2 * 3): the addition is the root.
        let ExprKind::Binary { op, right, .. } = &initializer.as_ref().unwrap().kind else {
            panic!("expected binary initializer");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn parses_if_elseif_else_chain() {
        let stmts = parse_ok(indoc! {r#"
            jika a maka
                println(1)
            kalau b maka
                println(2)
            sebaliknya
                println(3)
            tutup
        "#});
        let StmtKind::If { else_branch, .. } = &stmts[0].kind else {
            panic!("expected if");
        };
        let nested = else_branch.as_ref().expect("kalau arm");
        assert!(matches!(nested.kind, StmtKind::If { .. }));
    }

    #[test]
    fn parses_for_with_step() {
        let stmts = parse_ok("untuk i = 10 ke 1 langkah -1 lakukan println(i) tutup");
        let StmtKind::For { var, step, .. } = &stmts[0].kind else {
            panic!("expected for");
        };
        assert_eq!(var, "i");
        assert!(step.is_some());
    }

    #[test]
    fn class_methods_get_self_prepended() {
        let stmts = parse_ok(indoc! {r#"
            kelas Titik maka
                fungsi inisiasi(x, y)
                    self.x = x
                    self.y = y
                tutup
            tutup
        "#});
        let StmtKind::Class { name, methods } = &stmts[0].kind else {
            panic!("expected class");
        };
        assert_eq!(name, "Titik");
        let StmtKind::Function { params, .. } = &methods[0].kind else {
            panic!("expected method");
        };
        assert_eq!(params, &["self", "x", "y"]);
    }

    #[test]
    fn parses_try_catch_with_variable() {
        let stmts = parse_ok(indoc! {r#"
            coba
                bahaya()
            tangkap pesan
                println(pesan)
            tutup
        "#});
        let StmtKind::Try {
            catch_var,
            catch_body,
            ..
        } = &stmts[0].kind
        else {
            panic!("expected try");
        };
        assert_eq!(catch_var.as_deref(), Some("pesan"));
        assert!(catch_body.is_some());
    }

    #[test]
    fn parses_index_and_slice_forms() {
        let stmts = parse_ok("lokal a = xs[1] lokal b = xs[2:3] lokal c = xs[:2] lokal d = xs[2:]");
        let init = |i: usize| -> &ExprKind {
            let StmtKind::VarDecl { initializer, .. } = &stmts[i].kind else {
                panic!("expected decl");
            };
            &initializer.as_ref().unwrap().kind
        };
        assert!(matches!(init(0), ExprKind::Index { .. }));
        assert!(matches!(
            init(1),
            ExprKind::Slice {
                start: Some(_),
                end: Some(_),
                ..
            }
        ));
        assert!(matches!(
            init(2),
            ExprKind::Slice {
                start: None,
                end: Some(_),
                ..
            }
        ));
        assert!(matches!(
            init(3),
            ExprKind::Slice {
                start: Some(_),
                end: None,
                ..
            }
        ));
    }

    #[test]
    fn invalid_assignment_target_is_reported() {
        let result = parse_source("1 + 2 = 3");
        assert!(result.had_error);
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.contains("Lokasi penugasan tidak sah"))
        );
    }

    #[test]
    fn recovery_continues_after_bad_statement() {
        let result = parse_source(indoc! {r#"
            lokal = 1
            lokal ok = 2
        "#});
        assert!(result.had_error);
        assert!(
            result
                .statements
                .iter()
                .any(|s| matches!(&s.kind, StmtKind::VarDecl { name, .. } if name == "ok"))
        );
    }

    #[test]
    fn diagnostic_carries_caret_and_category() {
        let result = parse_source("jika 1 2");
        assert!(result.had_error);
        let report = &result.diagnostics[0];
        assert!(report.contains("[ERROR SINTAKS]"));
        assert!(report.contains("^"));
        assert!(report.contains("ditemukan angka"));
    }

    #[test]
    fn pathological_input_terminates() {
        let result = parse_source(") ) ) ] ] } } ( [ {");
        assert!(result.had_error);
    }

    #[test]
    fn radix_and_separator_numbers_parse() {
        assert_eq!(parse_number("1_000"), Some(1000.0));
        assert_eq!(parse_number("0xFF"), Some(255.0));
        assert_eq!(parse_number("0b1010"), Some(10.0));
        assert_eq!(parse_number("0o77"), Some(63.0));
        assert_eq!(parse_number("1.2e+3"), Some(1200.0));
        assert_eq!(parse_number("0x"), None);
    }

    #[test]
    fn compound_assignment_parses_to_assign_node() {
        let stmts = parse_ok("x += 2");
        let StmtKind::Expr(expr) = &stmts[0].kind else {
            panic!("expected expr stmt");
        };
        assert!(matches!(
            expr.kind,
            ExprKind::Assign {
                op: AssignOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn function_expression_parses() {
        let stmts = parse_ok("lokal f = fungsi(a, b) kembali a + b tutup");
        let StmtKind::VarDecl { initializer, .. } = &stmts[0].kind else {
            panic!("expected decl");
        };
        assert!(matches!(
            initializer.as_ref().unwrap().kind,
            ExprKind::Function { .. }
        ));
    }
}
