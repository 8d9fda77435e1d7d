//! swcrctl: swcr transform engine CLI
//!
//! Commands:
//!   selftest                     - run the known-answer vectors through the engine
//!   algorithms [--json]          - list supported algorithms and their parameters
//!   encrypt / decrypt            - CBC a file (IV || ciphertext, PKCS#7 padded)
//!   mac <input>                  - print the authentication tag of a file
//!   config show                  - display current configuration

mod selftest;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use block_padding::{Pkcs7, RawPadding};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

use swcr_core::config::EngineConfig;
use swcr_core::Algorithm;
use swcr_crypto::xform::{self, AuthMode, Capability};
use swcr_crypto::{CryptoBuffer, Descriptor, Engine, SessionInit};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "swcrctl", version, about = "swcr software transform engine")]
struct Cli {
    /// Path to swcr.toml configuration file
    #[arg(long, short = 'c', env = "SWCR_CONFIG", default_value = "/etc/swcr/config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "SWCR_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "SWCR_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run known-answer tests for every algorithm
    Selftest,

    /// List supported algorithms
    Algorithms {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// CBC-encrypt a file; output is IV || ciphertext
    Encrypt {
        #[command(flatten)]
        args: CipherArgs,
        /// Base64 IV; a random one is used when omitted
        #[arg(long)]
        iv: Option<String>,
    },

    /// Decrypt a file produced by `encrypt`
    Decrypt {
        #[command(flatten)]
        args: CipherArgs,
    },

    /// Print the authentication tag (hex) of a file
    Mac {
        /// Algorithm name, e.g. hmac-sha1-96
        #[arg(long, short = 'a', default_value = "hmac-sha1-96")]
        algorithm: String,
        /// Base64 key; omit for unkeyed digests
        #[arg(long, short = 'k', env = "SWCR_MAC_KEY")]
        key: Option<String>,
        input: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct CipherArgs {
    /// Algorithm name, e.g. aes-cbc
    #[arg(long, short = 'a', default_value = "aes-cbc")]
    algorithm: String,
    /// Base64 key
    #[arg(long, short = 'k', env = "SWCR_KEY")]
    key: String,
    input: PathBuf,
    /// Output file (default: stdout)
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load(&cli.config)?;

    let level = cli.log.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = match cli.log_format {
        Some(format) => format,
        None if config.logging.format.eq_ignore_ascii_case("json") => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(&level, format);
    debug!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "swcrctl starting");

    match cli.command {
        Commands::Selftest => cmd_selftest(&config),
        Commands::Algorithms { json } => cmd_algorithms(json),
        Commands::Encrypt { args, iv } => cmd_encrypt(&config, &args, iv.as_deref()),
        Commands::Decrypt { args } => cmd_decrypt(&config, &args),
        Commands::Mac { algorithm, key, input } => cmd_mac(&config, &algorithm, key.as_deref(), &input),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── `swcrctl selftest` ────────────────────────────────────────────────────────

fn cmd_selftest(config: &EngineConfig) -> Result<()> {
    let engine = Engine::new(config);
    let mut failed = 0;
    for v in selftest::VECTORS {
        match selftest::run(&engine, v) {
            Ok(out) if out == v.expected => println!("ok    {}", v.name),
            Ok(out) => {
                failed += 1;
                println!("FAIL  {}: got {out}, want {}", v.name, v.expected);
            }
            Err(e) => {
                failed += 1;
                println!("FAIL  {}: {e:#}", v.name);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} vectors failed", selftest::VECTORS.len());
    }
    println!("\nall {} vectors passed", selftest::VECTORS.len());
    Ok(())
}

// ── `swcrctl algorithms` ──────────────────────────────────────────────────────

fn describe(alg: Algorithm) -> serde_json::Value {
    match xform::capability(alg) {
        Capability::Cipher(spec) => serde_json::json!({
            "name": alg.name(),
            "kind": "cipher",
            "block_size": spec.block_size,
            "min_key_len": spec.min_key_len,
            "max_key_len": spec.max_key_len,
        }),
        Capability::Auth(spec) => serde_json::json!({
            "name": alg.name(),
            "kind": match spec.mode {
                AuthMode::Hmac => "hmac",
                AuthMode::KeyPlusData => "key-plus-data",
                AuthMode::Digest => "digest",
            },
            "digest_size": spec.hash.digest_size,
            "output_size": spec.output_size,
        }),
    }
}

fn cmd_algorithms(json: bool) -> Result<()> {
    let all: Vec<serde_json::Value> = Algorithm::ALL.into_iter().map(describe).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }
    println!("{:<20} {:<14} details", "NAME", "KIND");
    for alg in Algorithm::ALL {
        let details = match xform::capability(alg) {
            Capability::Cipher(spec) if spec.min_key_len == spec.max_key_len => {
                format!("block {} B, key {} B", spec.block_size, spec.min_key_len)
            }
            Capability::Cipher(spec) => format!(
                "block {} B, key {}..={} B",
                spec.block_size, spec.min_key_len, spec.max_key_len
            ),
            Capability::Auth(spec) => format!("tag {} B", spec.output_size),
        };
        let kind = describe(alg)["kind"].as_str().unwrap_or_default().to_string();
        println!("{:<20} {:<14} {details}", alg.name(), kind);
    }
    Ok(())
}

// ── `swcrctl encrypt` / `swcrctl decrypt` ─────────────────────────────────────

fn cipher_algorithm(name: &str) -> Result<(Algorithm, usize)> {
    let alg: Algorithm = name.parse()?;
    let spec = xform::cipher_spec(alg).with_context(|| format!("{alg} is not a cipher"))?;
    Ok((alg, spec.block_size))
}

fn decode_b64(what: &str, value: &str) -> Result<Zeroizing<Vec<u8>>> {
    B64.decode(value.trim())
        .map(Zeroizing::new)
        .with_context(|| format!("decoding base64 {what}"))
}

/// Pad the trailing partial block; a whole final block gets a full pad block.
fn pkcs7_pad(data: &mut Vec<u8>, bs: usize) {
    let pos = data.len() % bs;
    let start = data.len() - pos;
    data.resize(start + bs, 0);
    Pkcs7::raw_pad(&mut data[start..], pos);
}

fn pkcs7_unpad(data: &mut Vec<u8>, bs: usize) -> Result<()> {
    const BAD_PADDING: &str = "bad padding (wrong key or corrupted input)";
    if data.len() < bs || data.len() % bs != 0 {
        anyhow::bail!(BAD_PADDING);
    }
    let last = data.len() - bs;
    let kept = Pkcs7::raw_unpad(&data[last..])
        .map_err(|_| anyhow::anyhow!(BAD_PADDING))?
        .len();
    data.truncate(last + kept);
    Ok(())
}

fn write_output(output: Option<&Path>, data: &[u8]) -> Result<()> {
    use std::io::Write;
    match output {
        Some(path) => std::fs::write(path, data).with_context(|| format!("writing {}", path.display())),
        None => std::io::stdout().write_all(data).context("writing stdout"),
    }
}

/// Run a single cipher descriptor on a one-step session.
fn run_cipher(config: &EngineConfig, alg: Algorithm, key: &[u8], desc: Descriptor, data: Vec<u8>) -> Result<Vec<u8>> {
    let engine = Engine::new(config);
    let id = engine
        .create_session(&[SessionInit::new(alg, key)])
        .with_context(|| format!("creating {alg} session"))?;
    let completion = engine.dispatch(id, &[desc], CryptoBuffer::Contiguous(data));
    engine.destroy_session(id);
    completion.result.with_context(|| format!("{alg} transform"))?;
    Ok(completion.buffer.to_vec())
}

fn cmd_encrypt(config: &EngineConfig, args: &CipherArgs, iv: Option<&str>) -> Result<()> {
    let (alg, bs) = cipher_algorithm(&args.algorithm)?;
    let key = decode_b64("key", &args.key)?;
    let plain = std::fs::read(&args.input).with_context(|| format!("reading {}", args.input.display()))?;

    // The IV slot is one whole block, so padding the packet pads the body.
    let mut packet = Zeroizing::new(vec![0u8; bs]);
    packet.extend_from_slice(&plain);
    pkcs7_pad(&mut packet, bs);
    let length = packet.len() - bs;

    let mut desc = Descriptor::encrypt(alg, bs, length, 0);
    if let Some(iv) = iv {
        desc = desc.with_iv(&decode_b64("IV", iv)?);
    }
    let sealed = run_cipher(config, alg, &key, desc, packet.to_vec())?;
    info!(algorithm = %alg, bytes = plain.len(), "encrypted");
    write_output(args.output.as_deref(), &sealed)
}

fn cmd_decrypt(config: &EngineConfig, args: &CipherArgs) -> Result<()> {
    let (alg, bs) = cipher_algorithm(&args.algorithm)?;
    let key = decode_b64("key", &args.key)?;
    let sealed = std::fs::read(&args.input).with_context(|| format!("reading {}", args.input.display()))?;
    if sealed.len() < 2 * bs || sealed.len() % bs != 0 {
        anyhow::bail!(
            "{} is not {alg} output: {} bytes is not IV plus whole blocks",
            args.input.display(),
            sealed.len()
        );
    }

    let desc = Descriptor::decrypt(alg, bs, sealed.len() - bs, 0);
    let mut plain = Zeroizing::new(run_cipher(config, alg, &key, desc, sealed)?.split_off(bs));
    pkcs7_unpad(&mut plain, bs)?;
    info!(algorithm = %alg, bytes = plain.len(), "decrypted");
    write_output(args.output.as_deref(), &plain)
}

// ── `swcrctl mac` ─────────────────────────────────────────────────────────────

fn cmd_mac(config: &EngineConfig, algorithm: &str, key: Option<&str>, input: &Path) -> Result<()> {
    let alg: Algorithm = algorithm.parse()?;
    let spec = xform::auth_spec(alg).with_context(|| format!("{alg} is not an authentication algorithm"))?;
    let init = match key {
        Some(key) => SessionInit::new(alg, &decode_b64("key", key)?),
        None if alg.is_keyed() => anyhow::bail!("{alg} needs --key"),
        None => SessionInit::unkeyed(alg),
    };

    let mut data = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let len = data.len();
    data.resize(len + spec.output_size, 0);

    let engine = Engine::new(config);
    let id = engine.create_session(&[init]).with_context(|| format!("creating {alg} session"))?;
    let completion = engine.dispatch(id, &[Descriptor::auth(alg, 0, len, len)], CryptoBuffer::Contiguous(data));
    engine.destroy_session(id);
    completion.result.with_context(|| format!("{alg} over {}", input.display()))?;

    let tag = completion.tags.first().context("engine returned no tag")?;
    println!("{}  {}", tag.tag.to_hex(), input.display());
    Ok(())
}

// ── `swcrctl config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &EngineConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
