use crate::error::Result;
use crate::lexer::Token;
use super::ast::*;
use super::Parser;

impl Parser {
    pub(super) fn parse_begin(&mut self) -> Result<Statement> {
        self.advance(); // BEGIN or START
        if *self.peek() == Token::Transaction {
            self.advance();
        }
        Ok(Statement::Begin)
    }

    pub(super) fn parse_show(&mut self) -> Result<Statement> {
        self.expect(Token::Show)?;
        let full = if *self.peek() == Token::Full {
            self.advance();
            true
        } else {
            false
        };
        match self.peek() {
            Token::Tables => {
                self.advance();
                Ok(Statement::ShowTables)
            }
            Token::Databases => {
                self.advance();
                Ok(Statement::ShowDatabases)
            }
            Token::Processlist => {
                self.advance();
                Ok(Statement::ShowProcessList { full })
            }
            other => Err(self.error_with_context(format!(
                "Expected TABLES, DATABASES, or PROCESSLIST after SHOW, found {:?}",
                other
            ))),
        }
    }

    pub(super) fn parse_describe(&mut self) -> Result<Statement> {
        self.advance(); // DESCRIBE or DESC
        let table_name = self.consume_identifier()?;
        Ok(Statement::Describe(table_name))
    }

    pub(super) fn parse_use(&mut self) -> Result<Statement> {
        self.expect(Token::Use)?;
        let database = self.consume_identifier()?;
        Ok(Statement::UseDatabase(database))
    }
}
