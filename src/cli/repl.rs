//! Interactive query loop.
//!
//! Lines starting with a known `/command` are handled locally; everything
//! else is sent to the server as SQL and the first rows are printed.

use std::path::{Path, PathBuf};

use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::cli::table::render_table;
use crate::client::{Query, SimpleJdbcClient, TablesQuery};
use crate::error::ClientError;

/// Rows fetched for each ad-hoc query.
pub const PREVIEW_LIMIT: u32 = 10;

const PROMPT: &str = "> ";

const HELP: &str = "\
Commands:
  /tables [--catalog C] [--schema-pattern P] [--table-pattern T]
                 List tables (patterns use LIKE syntax, see /tables --help)
  /catalogs      List catalogs
  /metadata      Show server metadata
  /help          Show this help
  /quit, /exit   Leave (or press Ctrl-D)

Anything else is run as SQL; the first 10 rows are shown.";

/// One line of input, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Empty,
    Quit,
    Help,
    Metadata,
    Catalogs,
    /// `/tables` with its parsed arguments.
    Tables(TablesCommand),
    /// A SQL statement.
    Query(String),
}

/// Outcome of parsing `/tables` arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TablesCommand {
    Valid(TablesQuery),
    Help(String),
    Invalid(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ReplCommand::Empty;
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim_start()),
            None => (line, ""),
        };
        match word {
            "/quit" | "/exit" => ReplCommand::Quit,
            "/help" => ReplCommand::Help,
            "/metadata" => ReplCommand::Metadata,
            "/catalogs" => ReplCommand::Catalogs,
            "/tables" => ReplCommand::Tables(parse_tables(rest)),
            _ => ReplCommand::Query(line.to_string()),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "/tables",
    about = "Search tables in the database",
    no_binary_name = true,
    disable_version_flag = true
)]
struct TablesArgs {
    /// The catalog to limit results to
    #[arg(long, value_name = "CATALOG")]
    catalog: Option<String>,

    /// The schema pattern (using standard LIKE syntax) to use in limiting results
    #[arg(long, value_name = "SCHEMA_PATTERN")]
    schema_pattern: Option<String>,

    /// The table pattern (using standard LIKE syntax) to use in limiting results
    #[arg(long, value_name = "TABLE_PATTERN")]
    table_pattern: Option<String>,
}

fn parse_tables(args: &str) -> TablesCommand {
    let args = match split_args(args) {
        Ok(args) => args,
        Err(e) => return TablesCommand::Invalid(e),
    };
    match TablesArgs::try_parse_from(args) {
        Ok(parsed) => TablesCommand::Valid(TablesQuery {
            catalog: parsed.catalog,
            schema_pattern: parsed.schema_pattern,
            table_pattern: parsed.table_pattern,
        }),
        Err(e) if e.kind() == clap::error::ErrorKind::DisplayHelp => {
            TablesCommand::Help(e.render().to_string())
        }
        Err(e) => TablesCommand::Invalid(e.render().to_string()),
    }
}

/// Split a command line into words, honoring single and double quotes and
/// backslash escapes outside single quotes.
pub fn split_args(input: &str) -> Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some('\''), '\'') | (Some('"'), '"') => quote = None,
            (Some('\''), c) => current.push(c),
            (_, '\\') => match chars.next() {
                Some(escaped) => {
                    current.push(escaped);
                    in_word = true;
                }
                None => return Err("trailing backslash".to_string()),
            },
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if let Some(q) = quote {
        return Err(format!("unterminated {} quote", q));
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}

/// Runs commands against one server and JDBC URL.
pub struct Repl<'a> {
    client: &'a SimpleJdbcClient,
    jdbc_url: &'a str,
}

impl<'a> Repl<'a> {
    pub fn new(client: &'a SimpleJdbcClient, jdbc_url: &'a str) -> Self {
        Self { client, jdbc_url }
    }

    /// Execute one command and return the text to show. `Quit` and `Empty`
    /// produce nothing.
    pub async fn execute(&self, command: &ReplCommand) -> Result<Option<String>, ClientError> {
        let output = match command {
            ReplCommand::Empty | ReplCommand::Quit => return Ok(None),
            ReplCommand::Help => HELP.to_string(),
            ReplCommand::Metadata => {
                let metadata = self.client.metadata().await?;
                serde_json::to_string_pretty(&metadata).unwrap_or_else(|_| metadata.to_string())
            }
            ReplCommand::Catalogs => self.client.catalogs(self.jdbc_url).await?.join("\n"),
            ReplCommand::Tables(TablesCommand::Help(help)) => help.trim_end().to_string(),
            ReplCommand::Tables(TablesCommand::Invalid(message)) => message.trim_end().to_string(),
            ReplCommand::Tables(TablesCommand::Valid(query)) => {
                let tables = self.client.tables(self.jdbc_url, query).await?;
                let mut lines: Vec<String> = tables.iter().map(|t| t.qualified_name()).collect();
                let count = tables.len();
                lines.push(format!(
                    "({} {})",
                    count,
                    if count == 1 { "table" } else { "tables" }
                ));
                lines.join("\n")
            }
            ReplCommand::Query(sql) => {
                let result = self
                    .client
                    .preview(self.jdbc_url, &Query::statement(sql), Some(PREVIEW_LIMIT))
                    .await?;
                render_table(&result)
            }
        };
        Ok(Some(output))
    }

    /// Read lines until `/quit` or end of input. Remote failures are printed
    /// and the loop continues.
    pub async fn run(&self, history: Option<&Path>) -> anyhow::Result<()> {
        let mut editor = DefaultEditor::new()?;
        if let Some(path) = history
            && let Err(e) = editor.load_history(path)
        {
            tracing::debug!("No REPL history loaded from {}: {}", path.display(), e);
        }

        loop {
            // Needs the multi-threaded runtime.
            let line = match tokio::task::block_in_place(|| editor.readline(PROMPT)) {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(e) => return Err(e.into()),
            };

            let command = ReplCommand::parse(&line);
            if command == ReplCommand::Quit {
                break;
            }
            if command != ReplCommand::Empty {
                let _ = editor.add_history_entry(line.trim());
            }

            match self.execute(&command).await {
                Ok(Some(output)) => println!("{}", output),
                Ok(None) => {}
                Err(e) => eprintln!("Error: {}", e),
            }
        }

        if let Some(path) = history {
            save_history(&mut editor, path);
        }
        Ok(())
    }
}

fn save_history(editor: &mut DefaultEditor, path: &Path) {
    if let Some(parent) = path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        tracing::debug!("Cannot create history directory {}: {}", parent.display(), e);
        return;
    }
    if let Err(e) = editor.save_history(path) {
        tracing::debug!("Failed to save REPL history to {}: {}", path.display(), e);
    }
}

/// Default history file below the simple-jdbc home directory.
pub fn history_path(home: &Path) -> PathBuf {
    home.join("history")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ReplCommand::parse("   "), ReplCommand::Empty);
        assert_eq!(ReplCommand::parse("/quit"), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse(" /exit "), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse("/help"), ReplCommand::Help);
        assert_eq!(ReplCommand::parse("/metadata"), ReplCommand::Metadata);
        assert_eq!(ReplCommand::parse("/catalogs"), ReplCommand::Catalogs);
        assert_eq!(
            ReplCommand::parse("select * from t"),
            ReplCommand::Query("select * from t".to_string())
        );
        assert_eq!(
            ReplCommand::parse("/* hint */ select 1"),
            ReplCommand::Query("/* hint */ select 1".to_string())
        );
    }

    #[test]
    fn test_parse_tables_arguments() {
        let command = ReplCommand::parse("/tables --catalog main --table-pattern 'user%'");
        assert_eq!(
            command,
            ReplCommand::Tables(TablesCommand::Valid(TablesQuery {
                catalog: Some("main".to_string()),
                schema_pattern: None,
                table_pattern: Some("user%".to_string()),
            }))
        );

        assert_eq!(
            ReplCommand::parse("/tables"),
            ReplCommand::Tables(TablesCommand::Valid(TablesQuery::default()))
        );
    }

    #[test]
    fn test_tables_help_and_errors() {
        match ReplCommand::parse("/tables --help") {
            ReplCommand::Tables(TablesCommand::Help(help)) => {
                assert!(help.contains("--schema-pattern"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            ReplCommand::parse("/tables --bogus"),
            ReplCommand::Tables(TablesCommand::Invalid(_))
        ));
        assert!(matches!(
            ReplCommand::parse("/tables --catalog 'open"),
            ReplCommand::Tables(TablesCommand::Invalid(_))
        ));
    }

    #[test]
    fn test_split_args() {
        assert_eq!(
            split_args(r#"a "b c" 'd e' f\ g "" h"#).unwrap(),
            vec!["a", "b c", "d e", "f g", "", "h"]
        );
        assert_eq!(split_args("  ").unwrap(), Vec::<String>::new());
        assert_eq!(split_args(r#"'it''s'"#).unwrap(), vec!["its"]);
        assert!(split_args("\"open").is_err());
        assert!(split_args("trailing\\").is_err());
    }

    #[tokio::test]
    async fn test_local_commands_need_no_server() {
        let client = SimpleJdbcClient::new("http://127.0.0.1:9").unwrap();
        let repl = Repl::new(&client, "jdbc:h2:mem:");

        let help = repl.execute(&ReplCommand::Help).await.unwrap().unwrap();
        assert!(help.contains("/tables"));
        assert_eq!(repl.execute(&ReplCommand::Empty).await.unwrap(), None);
    }
}
