//! Prompt Builder
//!
//! Pure rendering of a generation prompt. Section order is fixed:
//! instructions, tables, additional context, question/SQL pairs, question.
//! Every item in the [`PromptContext`] is rendered; trimming is the
//! assembler's job.

use crate::context::PromptContext;
use std::fmt::Write;

pub const DEFAULT_DIALECT: &str = "PostgreSQL";

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    dialect: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_DIALECT)
    }
}

impl PromptBuilder {
    pub fn new(dialect: impl Into<String>) -> Self {
        Self {
            dialect: dialect.into(),
        }
    }

    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    pub fn build(&self, question: &str, context: &PromptContext) -> String {
        let mut prompt = String::new();
        // Writing into a String cannot fail.
        let _ = self.render(&mut prompt, question, context);
        prompt
    }

    fn render(&self, out: &mut String, question: &str, context: &PromptContext) -> std::fmt::Result {
        writeln!(
            out,
            "You are a {} expert working on an Odoo ERP database. \
             Generate exactly one SQL query that answers the question below, \
             using only the tables, context and examples provided.",
            self.dialect
        )?;
        writeln!(out)?;
        writeln!(out, "===Response Guidelines")?;
        writeln!(out, "1. Respond with a single {} statement and nothing else.", self.dialect)?;
        writeln!(out, "2. Only read data: never emit INSERT, UPDATE, DELETE, DROP or ALTER.")?;
        writeln!(out, "3. Use CURRENT_DATE for relative dates instead of hard-coded dates.")?;
        writeln!(
            out,
            "4. When a similar question is listed, adapt its SQL, but take every number \
             (days, years, limits) from the current question."
        )?;
        writeln!(
            out,
            "5. If the context is insufficient, explain why instead of guessing table names."
        )?;

        if !context.related_ddl.is_empty() {
            writeln!(out)?;
            writeln!(out, "===Tables")?;
            for fact in &context.related_ddl {
                writeln!(out, "-- {}", fact.identifier)?;
                writeln!(out, "{}", fact.ddl_or_description.trim_end())?;
                writeln!(out)?;
            }
        }

        if !context.related_docs.is_empty() {
            writeln!(out)?;
            writeln!(out, "===Additional Context")?;
            for doc in &context.related_docs {
                writeln!(out, "[{}]", doc.topic)?;
                writeln!(out, "{}", doc.text.trim_end())?;
                writeln!(out)?;
            }
        }

        if !context.similar_examples.is_empty() {
            writeln!(out)?;
            writeln!(out, "===Question-SQL Pairs")?;
            for example in &context.similar_examples {
                writeln!(out, "Question: {}", example.question.trim())?;
                writeln!(out, "SQL:")?;
                writeln!(out, "{}", example.sql.trim_end())?;
                writeln!(out)?;
            }
        }

        writeln!(out)?;
        writeln!(out, "===Question")?;
        writeln!(out, "{}", question.trim())?;
        writeln!(out)?;
        write!(out, "SQL:")?;
        Ok(())
    }
}

/// Render with the default dialect.
pub fn build_prompt(question: &str, context: &PromptContext) -> String {
    PromptBuilder::default().build(question, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentationFact, SchemaFact, TrainingExample};

    fn context() -> PromptContext {
        PromptContext {
            similar_examples: vec![
                TrainingExample::new(
                    "Quais produtos foram vendidos nos últimos 30 dias?",
                    "SELECT pt.name FROM sale_order_line sol JOIN product_product pp ON pp.id = sol.product_id \
                     JOIN product_template pt ON pt.id = pp.product_tmpl_id \
                     WHERE sol.create_date >= CURRENT_DATE - INTERVAL '30 days';",
                ),
                TrainingExample::new("Total de vendas por mês", "SELECT date_trunc('month', date_order), SUM(amount_total) FROM sale_order GROUP BY 1;"),
            ],
            related_ddl: vec![SchemaFact {
                identifier: "sale_order".to_string(),
                ddl_or_description: "CREATE TABLE sale_order (id integer, date_order timestamp, amount_total numeric);"
                    .to_string(),
            }],
            related_docs: vec![DocumentationFact {
                topic: "vendas".to_string(),
                text: "Pedidos confirmados têm state = 'sale'.".to_string(),
            }],
        }
    }

    #[test]
    fn test_sections_render_in_fixed_order() {
        let prompt = build_prompt("Quais produtos foram vendidos nos últimos 60 dias?", &context());

        let guidelines = prompt.find("===Response Guidelines").unwrap();
        let tables = prompt.find("===Tables").unwrap();
        let docs = prompt.find("===Additional Context").unwrap();
        let pairs = prompt.find("===Question-SQL Pairs").unwrap();
        let question = prompt.find("===Question\n").unwrap();

        assert!(guidelines < tables);
        assert!(tables < docs);
        assert!(docs < pairs);
        assert!(pairs < question);
        assert!(prompt.trim_end().ends_with("SQL:"));
    }

    #[test]
    fn test_every_selected_item_is_rendered() {
        let ctx = context();
        let prompt = build_prompt("q", &ctx);
        for example in &ctx.similar_examples {
            assert!(prompt.contains(&example.question));
        }
        assert!(prompt.contains("CREATE TABLE sale_order"));
        assert!(prompt.contains("state = 'sale'"));
    }

    #[test]
    fn test_build_is_deterministic() {
        let ctx = context();
        assert_eq!(build_prompt("q", &ctx), build_prompt("q", &ctx));
    }

    #[test]
    fn test_empty_context_still_has_instructions_and_question() {
        let prompt = PromptBuilder::new("SQLite").build("Quantos clientes?", &PromptContext::default());
        assert!(prompt.contains("SQLite expert"));
        assert!(prompt.contains("Quantos clientes?"));
        assert!(!prompt.contains("===Tables"));
    }
}
