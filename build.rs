use clap::ValueEnum;

include!("src/cli.rs");

const ALIASES: [(&str,&[&str]);2] = [
    ("(catalog)", &["(ls)","(dir)","(cat)"]),
    ("(delete)" , &["(del)","(era)"])
];

fn refine_zsh(script: &str) -> String {
    let aliases = std::collections::HashMap::from(ALIASES);
    let eq_patt = regex::RegexBuilder::new(r"^'--(\w+)=\[").multi_line(true).build().expect("regex parsing error");
    let alias_patt = regex::Regex::new(r"^\(\w+\)$").expect("regex parsing error");
    let intermediate = eq_patt.replace_all(script, "'--$1+[");
    let mut new_script = String::new();
    let mut accum = String::new();
    let mut curr_cmd = String::new();
    let mut alias_list : &[&str] = &[];
    for line in intermediate.lines() {
        match alias_patt.find(line) {
            Some(res) if aliases.contains_key(res.as_str()) => {
                accum = line.to_string();
                accum += "\n";
                alias_list = aliases[res.as_str()];
                curr_cmd = res.as_str().to_string();
            },
            _ => {
                if accum.len() > 0 {
                    accum += line;
                    accum += "\n";
                    if line==";;" {
                        new_script += &accum;
                        for alias in alias_list {
                            new_script += &accum.replace(&curr_cmd,alias);
                        }
                        accum = "".to_string();
                    }
                } else {
                    new_script += line;
                    new_script += "\n";
                }
            }
        }
    }
    return new_script;
}

fn main() -> Result<(), std::io::Error> {
    println!("cargo:rerun-if-changed=src/cli.rs");
    if std::env::var("DOCS_RS").is_err() {
        let outdir = match std::env::var_os("OUT_DIR") {
            None => return Ok(()),
            Some(dir) => std::path::Path::new(&dir).join("completions"),
        };
        std::fs::create_dir_all(&outdir)?;

        let mut cmd = build_cli();

        for &shell in clap_complete::Shell::value_variants() {
            clap_complete::generate_to(shell, &mut cmd, "flopkit", &outdir)?;
            if shell==clap_complete::Shell::Zsh {
                let s = std::fs::read(outdir.join("_flopkit"))?;
                let script = String::from_utf8_lossy(&s);
                std::fs::write(outdir.join("_flopkit"),refine_zsh(&script))?;
            }
        }
    }

    Ok(())
}
