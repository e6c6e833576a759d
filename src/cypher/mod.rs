//! Cypher front end for the in-memory driver.
//!
//! [`lexer`] turns query text into tokens and [`parser`] turns the tokens
//! into an [`ast::Query`]. Neither looks at a graph: the same text always
//! yields the same tree or the same `SyntaxError`.

pub mod ast;
pub mod lexer;
pub mod parser;

pub fn parse(query: &str) -> crate::Result<ast::Query> {
    parser::parse_query(&lexer::tokenize(query)?)
}
