use pattern_compiler::{compile, Flags, Options, StartClass};

const USAGE: &str = "inspect [-i] [-m] [-s] [-x] [--debug] PATTERN";

fn main() -> Result<(), String> {
    let (debug, flags, args) = std::env::args().skip(1).fold(
        (false, Flags::empty(), vec![]),
        |(debug, flags, mut args), arg| match arg.as_str() {
            "--debug" | "-d" => (true, flags, args),
            "-i" => (debug, flags | Flags::CASELESS, args),
            "-m" => (debug, flags | Flags::MULTILINE, args),
            "-s" => (debug, flags | Flags::DOTALL, args),
            "-x" => (debug, flags | Flags::EXTENDED, args),
            _ => {
                args.push(arg);
                (debug, flags, args)
            }
        },
    );

    let pattern = match args.as_slice() {
        [pattern] => Ok(pattern.as_str()),
        _ => Err(USAGE.to_string()),
    }?;

    let options = Options {
        flags,
        ..Options::default()
    };
    let compiled = compile(pattern, options).map_err(|e| e.to_string())?;

    for warning in &compiled.warnings {
        eprintln!("warning: {}", warning);
    }

    println!(
        "{} instructions, {} groups, min length {}{}",
        compiled.program.len(),
        compiled.group_count,
        compiled.min_len,
        if compiled.wide { ", wide" } else { "" }
    );
    if let Some(sub) = &compiled.anchored_substring {
        println!("anchored substring: {:?} at {}", sub.text, sub.min_offset);
    }
    if let Some(sub) = &compiled.floating_substring {
        println!("floating substring: {:?} from {}", sub.text, sub.min_offset);
    }
    match &compiled.start_class {
        StartClass::None => {}
        StartClass::Set(list) => println!("start class: {} ranges", list.range_count()),
        StartClass::TrieScanner(id) => println!("start class: trie {} scanner", id),
    }

    if debug {
        println!(
            "DEBUG
--------
{}--------
",
            compiled
        )
    }

    Ok(())
}
