//! Command-line front end: check, query, re-serialize, canonicalize and
//! expand `XInclude` directives in XML files.
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use etree_oxide::parser::{self, TreeBuilder, TreeBuilderOptions, XmlParser};
use etree_oxide::path::Namespaces;
use etree_oxide::serial::c14n::{canonicalize_file, canonicalize_to, C14nOptions};
use etree_oxide::serial::{indent, tobytes, Method, WriteOptions};
use etree_oxide::xinclude::{include_files, IncludeOptions, DEFAULT_MAX_DEPTH};
use etree_oxide::{Document, Error, NodeKind};

const EXIT_SUCCESS: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_INPUT_ERROR: u8 = 2;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// etree -- parse, query and serialize XML documents.
#[derive(Parser, Debug)]
#[command(name = "etree", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that files are well-formed.
    Parse {
        /// XML files to check (use `-` for stdin).
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// Print the nodes matching a path expression.
    Find {
        /// XML file to query (use `-` for stdin).
        file: String,

        /// Path expression, e.g. `.//item[@id='3']`.
        path: String,

        /// Namespace binding for the expression, as `prefix=uri`. An empty
        /// prefix sets the default namespace.
        #[arg(long = "ns", value_name = "PREFIX=URI", value_parser = parse_binding)]
        namespaces: Vec<(String, String)>,

        /// Print the text of each match instead of its markup.
        #[arg(long)]
        text: bool,
    },

    /// Parse a file and serialize it again.
    Write {
        /// XML file to read (use `-` for stdin).
        file: String,

        #[command(flatten)]
        output: OutputArgs,

        /// Output method: xml, html or text.
        #[arg(long, default_value = "xml")]
        method: Method,

        /// Output encoding label.
        #[arg(long, value_name = "ENCODING", default_value = "utf-8")]
        encoding: String,

        /// Always write an XML declaration.
        #[arg(long)]
        xml_declaration: bool,

        /// Namespace URI to write without prefix.
        #[arg(long, value_name = "URI")]
        default_namespace: Option<String>,

        /// Write empty elements as start-end tag pairs.
        #[arg(long)]
        no_short_empty: bool,

        /// Pretty-print with this many spaces per level.
        #[arg(long, value_name = "N")]
        indent: Option<usize>,

        /// Keep comments and processing instructions inside the root.
        #[arg(long)]
        keep_comments: bool,
    },

    /// Write the Canonical XML 2.0 form of a file.
    C14n {
        /// XML file to canonicalize (use `-` for stdin).
        file: String,

        #[command(flatten)]
        output: OutputArgs,

        /// Keep comments.
        #[arg(long)]
        with_comments: bool,

        /// Trim whitespace around text outside `xml:space="preserve"`.
        #[arg(long)]
        strip_text: bool,

        /// Replace prefixes with n0, n1, ...
        #[arg(long)]
        rewrite_prefixes: bool,

        /// Tag whose text is a prefixed name (repeatable, Clark notation).
        #[arg(long = "qname-aware-tag", value_name = "TAG")]
        qname_aware_tags: Vec<String>,

        /// Attribute whose value is a prefixed name (repeatable).
        #[arg(long = "qname-aware-attr", value_name = "ATTR")]
        qname_aware_attrs: Vec<String>,

        /// Tag to drop with its content (repeatable).
        #[arg(long = "exclude-tag", value_name = "TAG")]
        exclude_tags: Vec<String>,

        /// Attribute to drop (repeatable).
        #[arg(long = "exclude-attr", value_name = "ATTR")]
        exclude_attrs: Vec<String>,
    },

    /// Expand XInclude directives and write the result.
    Xinclude {
        /// XML file to process. Relative hrefs resolve against its path.
        file: PathBuf,

        #[command(flatten)]
        output: OutputArgs,

        /// Maximum nesting of includes.
        #[arg(long, default_value_t = DEFAULT_MAX_DEPTH, conflicts_with = "unlimited")]
        max_depth: i32,

        /// Do not limit the nesting of includes.
        #[arg(long)]
        unlimited: bool,
    },
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Write to this file instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

fn parse_binding(arg: &str) -> Result<(String, String), String> {
    arg.split_once('=')
        .map(|(prefix, uri)| (prefix.to_string(), uri.to_string()))
        .ok_or_else(|| format!("expected PREFIX=URI, got {arg:?}"))
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let exit = match cli.command {
        Command::Parse { files } => check_files(&files),
        command => match run(command) {
            Ok(()) => EXIT_SUCCESS,
            Err(e) => {
                eprintln!("etree: {e}");
                match e {
                    Error::Parse(_) | Error::Io(_) | Error::Include(_) => EXIT_INPUT_ERROR,
                    _ => EXIT_FAILURE,
                }
            }
        },
    };
    ExitCode::from(exit)
}

fn run(command: Command) -> Result<(), Error> {
    match command {
        Command::Parse { .. } => Ok(()),
        Command::Find {
            file,
            path,
            namespaces,
            text,
        } => find(&file, &path, &namespaces.into_iter().collect(), text),
        Command::Write {
            file,
            output,
            method,
            encoding,
            xml_declaration,
            default_namespace,
            no_short_empty,
            indent: level,
            keep_comments,
        } => {
            let builder = TreeBuilderOptions::default()
                .insert_comments(keep_comments)
                .insert_pis(keep_comments);
            let mut doc = read_document(&file, builder)?;
            let root = document_root(&doc)?;
            if let Some(width) = level {
                indent(&mut doc, root, &" ".repeat(width), 0)?;
            }
            let mut options = WriteOptions::default()
                .method(method)
                .encoding(&encoding)
                .short_empty_elements(!no_short_empty);
            if xml_declaration {
                options = options.xml_declaration(true);
            }
            if let Some(uri) = &default_namespace {
                options = options.default_namespace(uri);
            }
            let mut bytes = tobytes(&doc, root, &options)?;
            if method != Method::Text {
                bytes.push(b'\n');
            }
            write_output(output.output.as_deref(), &bytes)
        }
        Command::C14n {
            file,
            output,
            with_comments,
            strip_text,
            rewrite_prefixes,
            qname_aware_tags,
            qname_aware_attrs,
            exclude_tags,
            exclude_attrs,
        } => {
            let options = C14nOptions::default()
                .with_comments(with_comments)
                .strip_text(strip_text)
                .rewrite_prefixes(rewrite_prefixes)
                .qname_aware_tags(qname_aware_tags)
                .qname_aware_attrs(qname_aware_attrs)
                .exclude_tags(exclude_tags)
                .exclude_attrs(exclude_attrs);
            if file == "-" {
                let sink = open_output(output.output.as_deref())?;
                let mut sink = canonicalize_to(io::stdin().lock(), sink, &options)?;
                sink.flush()?;
                Ok(())
            } else {
                let text = canonicalize_file(&file, &options)?;
                write_output(output.output.as_deref(), text.as_bytes())
            }
        }
        Command::Xinclude {
            file,
            output,
            max_depth,
            unlimited,
        } => {
            let mut doc = parser::parse(&file)?;
            let root = document_root(&doc)?;
            let options = IncludeOptions::default()
                .base_url(&file.to_string_lossy())
                .max_depth((!unlimited).then_some(max_depth));
            include_files(&mut doc, root, &options)?;
            let mut bytes = tobytes(&doc, root, &WriteOptions::default().encoding("utf-8"))?;
            bytes.push(b'\n');
            write_output(output.output.as_deref(), &bytes)
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Parses every file, reporting each failure, and returns the exit code.
fn check_files(files: &[String]) -> u8 {
    let mut worst_exit = EXIT_SUCCESS;
    for file in files {
        match read_document(file, TreeBuilderOptions::default()) {
            Ok(doc) => {
                tracing::info!(file = %file, nodes = doc.node_count(), "parsed");
            }
            Err(e) => {
                eprintln!("{file}: {e}");
                worst_exit = EXIT_INPUT_ERROR;
            }
        }
    }
    worst_exit
}

fn find(file: &str, path: &str, namespaces: &Namespaces, text: bool) -> Result<(), Error> {
    let mut doc = read_document(file, TreeBuilderOptions::default())?;
    let root = document_root(&doc)?;
    let matches = doc.findall(root, path, Some(namespaces))?;
    tracing::debug!(path, matches = matches.len(), "query evaluated");
    let mut options = WriteOptions::default().encoding("utf-8");
    options.xml_declaration = Some(false);
    let mut out = Vec::new();
    for node in matches {
        if text {
            out.extend_from_slice(doc.text_content(node).as_bytes());
        } else if let NodeKind::Element { .. } = doc.kind(node) {
            // the match's tail belongs to its parent
            doc.set_tail(node, None);
            out.extend_from_slice(&tobytes(&doc, node, &options)?);
        }
        out.push(b'\n');
    }
    write_output(None, &out)
}

// ---------------------------------------------------------------------------
// Input and output
// ---------------------------------------------------------------------------

/// Parses a file, or stdin when `file` is `-`.
fn read_document(file: &str, options: TreeBuilderOptions) -> Result<Document, Error> {
    let bytes = if file == "-" {
        let mut input = Vec::new();
        io::stdin().lock().read_to_end(&mut input)?;
        input
    } else {
        fs::read(file)?
    };
    let mut xml = XmlParser::new(TreeBuilder::with_options(options));
    xml.feed(&bytes)?;
    xml.close()?;
    Ok(xml.into_target().into_document())
}

fn document_root(doc: &Document) -> Result<etree_oxide::NodeId, Error> {
    doc.root()
        .ok_or_else(|| Error::Config("document has no root element".to_string()))
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>, Error> {
    Ok(match path {
        Some(path) => Box::new(io::BufWriter::new(fs::File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    })
}

/// Writes output to stdout or to the file given with `--output`.
fn write_output(path: Option<&Path>, content: &[u8]) -> Result<(), Error> {
    let mut sink = open_output(path)?;
    sink.write_all(content)?;
    sink.flush()?;
    Ok(())
}
