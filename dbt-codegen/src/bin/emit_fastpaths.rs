use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use pico_dbt_codegen::{
    constants::INSN_BYTES, render_block, ControlFlowEmitter, EmitConfig, Instruction,
};
use pico_dbt_runtime::{constants::DEFAULT_DISPATCHER_STUB, logger::setup_logger, CodeCache};

fn parse_hex(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex value {}: {}", s, e))
}

/// Print the control-flow fast paths emitted for RV32 instruction words.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(
        long,
        default_value = "0",
        value_parser = parse_hex,
        help = "Guest pc of the first instruction (hex)"
    )]
    pc: u32,

    #[clap(
        long,
        env = "PICO_DBT_NO_SHACK",
        help = "Emit returns without the shadow stack"
    )]
    no_shadow_stack: bool,

    #[clap(long, env = "PICO_DBT_NO_IBTC", help = "Emit computed jumps without the IBTC")]
    no_ibtc: bool,

    #[clap(required = true, value_parser = parse_hex, help = "Instruction words (hex)")]
    words: Vec<u32>,
}

fn main() -> Result<()> {
    setup_logger();
    let args = Args::parse();

    let config = EmitConfig::new()
        .with_shadow_stack(!args.no_shadow_stack)
        .with_ibtc(!args.no_ibtc)
        .with_direct_jumps(false);
    let emitter = ControlFlowEmitter::new(config);
    let no_blocks = CodeCache::new(DEFAULT_DISPATCHER_STUB);

    for (i, &word) in args.words.iter().enumerate() {
        let pc = args.pc.wrapping_add(i as u32 * INSN_BYTES);
        let Some(fast_path) = Instruction::decode(word)
            .and_then(|inst| emitter.emit(pc, &inst, &no_blocks))
        else {
            warn!("{:#010x}: {:#010x} is not a control transfer", pc, word);
            continue;
        };
        info!("{:#010x}: {:#010x} is a {}", pc, word, fast_path.kind);
        println!("{}", render_block(pc, &fast_path).map_err(anyhow::Error::msg)?);
    }
    Ok(())
}
