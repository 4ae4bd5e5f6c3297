use std::io::{self, IsTerminal, Read, Write};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use env_logger::Env;
use log::debug;
use rustc_hash::FxHashSet;
use serde_json::json;
use tallytok::{Rank, Tokenizer};

#[derive(Parser, Debug)]
#[command(author, version, about = "cl100k_base token counter", long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (-q, -qq)
    #[arg(short = 'q', long, global = true, action = ArgAction::Count)]
    quiet: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Count tokens in text
    Count(CountArgs),
    /// Encode text to token ids
    Encode(EncodeArgs),
    /// Decode token ids back into text
    Decode(DecodeArgs),
    /// Show how text is split before merging
    Pieces(PiecesArgs),
    /// Inspect the bundled vocabulary
    Info(InfoArgs),
}

#[derive(Args, Debug)]
struct CountArgs {
    /// Text to count (reads stdin when omitted)
    text: Option<String>,

    /// Emit JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct EncodeArgs {
    /// Text to encode (reads stdin when omitted)
    text: Option<String>,

    /// Recognize this special token literal (repeat flag)
    #[arg(long = "allow-special", value_name = "LITERAL")]
    allow_special: Vec<String>,

    /// Recognize every registered special token
    #[arg(long, conflicts_with = "allow_special")]
    all_special: bool,

    /// Emit JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct DecodeArgs {
    /// Token ids, separated by whitespace or commas (reads stdin when omitted)
    ids: Vec<String>,

    /// Replace invalid UTF-8 instead of failing
    #[arg(long)]
    lossy: bool,
}

#[derive(Args, Debug)]
struct PiecesArgs {
    /// Text to split (reads stdin when omitted)
    text: Option<String>,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Emit JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let tokenizer = tallytok::shared().context("failed to load cl100k_base vocabulary")?;

    match cli.command {
        Commands::Count(args) => run_count(tokenizer, args),
        Commands::Encode(args) => run_encode(tokenizer, args),
        Commands::Decode(args) => run_decode(tokenizer, args),
        Commands::Pieces(args) => run_pieces(tokenizer, args),
        Commands::Info(args) => run_info(tokenizer, args),
    }
}

fn init_logging(verbose: u8, quiet: u8) {
    use log::LevelFilter;

    let level = if quiet > 0 {
        match quiet {
            1 => LevelFilter::Error,
            _ => LevelFilter::Off,
        }
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("warn"));
    builder.format_timestamp_millis();
    builder.filter_level(level);
    let _ = builder.try_init();
}

/// Use the argument if given, otherwise read all of stdin.
fn read_text(text: Option<String>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        debug!("reading text from terminal until EOF");
    }
    let mut buf = String::new();
    stdin
        .read_to_string(&mut buf)
        .context("failed to read text from stdin")?;
    Ok(buf)
}

fn run_count(tokenizer: &Tokenizer, args: CountArgs) -> Result<()> {
    let text = read_text(args.text)?;
    let count = tokenizer.count_tokens(&text)?;
    if args.json {
        println!("{}", json!({ "tokens": count }));
    } else {
        println!("{count}");
    }
    Ok(())
}

fn run_encode(tokenizer: &Tokenizer, args: EncodeArgs) -> Result<()> {
    let text = read_text(args.text)?;

    let mut allowed: FxHashSet<&str> = FxHashSet::default();
    if args.all_special {
        allowed.extend(tokenizer.special_tokens().keys().map(String::as_str));
    } else {
        for literal in &args.allow_special {
            if !tokenizer.special_tokens().contains_key(literal) {
                return Err(anyhow!("{literal:?} is not a registered special token"));
            }
            allowed.insert(literal.as_str());
        }
    }

    let (tokens, last_piece_tokens) = tokenizer.encode(&text, &allowed)?;
    if args.json {
        let record = json!({
            "tokens": tokens,
            "count": tokens.len(),
            "last_piece_tokens": last_piece_tokens,
        });
        println!("{}", serde_json::to_string(&record)?);
    } else {
        let line = tokens
            .iter()
            .map(Rank::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        println!("{line}");
    }
    Ok(())
}

fn parse_token_list(input: &str) -> Result<Vec<Rank>> {
    input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Rank>()
                .with_context(|| format!("invalid token id {s:?}"))
        })
        .collect()
}

fn run_decode(tokenizer: &Tokenizer, args: DecodeArgs) -> Result<()> {
    let tokens = if args.ids.is_empty() {
        parse_token_list(&read_text(None)?)?
    } else {
        parse_token_list(&args.ids.join(" "))?
    };

    let text = if args.lossy {
        tokenizer.decode_lossy(&tokens)?
    } else {
        tokenizer
            .decode(&tokens)
            .context("failed to decode token ids (try --lossy for invalid UTF-8)")?
    };

    let mut stdout = io::stdout();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

fn run_pieces(tokenizer: &Tokenizer, args: PiecesArgs) -> Result<()> {
    let text = read_text(args.text)?;
    for piece in tokenizer.split_pieces(&text)? {
        println!("{}", serde_json::to_string(piece)?);
    }
    Ok(())
}

fn run_info(tokenizer: &Tokenizer, args: InfoArgs) -> Result<()> {
    let mut special: Vec<(&String, &Rank)> = tokenizer.special_tokens().iter().collect();
    special.sort_by_key(|&(_, rank)| *rank);

    if args.json {
        let summary = json!({
            "vocab_size": tokenizer.vocab_size(),
            "ranks": tokenizer.encoder().len(),
            "special_tokens": special
                .iter()
                .map(|(literal, rank)| json!({ "token": literal, "id": rank }))
                .collect::<Vec<_>>(),
            "pattern": tokenizer.pattern(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Vocabulary    : cl100k_base");
        println!("Vocab size    : {}", tokenizer.vocab_size());
        println!("Ordinary ranks: {}", tokenizer.encoder().len());
        println!("Special tokens:");
        for (literal, rank) in special {
            println!("  {rank:>6}  {literal}");
        }
        println!("Pattern       : {}", tokenizer.pattern());
    }
    Ok(())
}
