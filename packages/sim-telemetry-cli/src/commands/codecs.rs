use crate::cli::CodecsArgs;
use crate::exit_codes;
use crate::output;
use serde::Serialize;
use sim_telemetry::Serializer;

#[derive(Serialize)]
struct CodecEntry {
    name: &'static str,
    binary: bool,
    default: bool,
}

#[derive(Serialize)]
struct CodecsOutput {
    cli_version: String,
    codecs: Vec<CodecEntry>,
}

pub fn execute(args: CodecsArgs) -> i32 {
    let info = CodecsOutput {
        cli_version: env!("CARGO_PKG_VERSION").to_string(),
        codecs: Serializer::ALL
            .iter()
            .map(|codec| CodecEntry {
                name: codec.name(),
                binary: codec.is_binary(),
                default: *codec == Serializer::default(),
            })
            .collect(),
    };

    if args.json {
        if let Err(code) = output::emit_json(&info, None) {
            return code;
        }
    } else {
        println!("simtel v{}", info.cli_version);
        println!();
        for codec in &info.codecs {
            println!(
                "  {:<10} {}{}",
                codec.name,
                if codec.binary { "binary" } else { "text" },
                if codec.default { " (default)" } else { "" }
            );
        }
    }

    exit_codes::SUCCESS
}
