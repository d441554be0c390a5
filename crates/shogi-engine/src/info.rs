use serde::Serialize;

/// A single ranked principal-variation line from the engine's `info` stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisLine {
    pub pv_index: u32,
    pub score_type: ScoreType,
    pub score_value: i64,
    pub depth: u32,
    pub seldepth: u32,
    pub nodes: u64,
    pub nps: u64,
    pub hashfull: u32,
    pub pv_usi: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreType {
    Cp,
    Mate,
    Unknown,
}

impl std::fmt::Display for ScoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoreType::Cp => write!(f, "cp"),
            ScoreType::Mate => write!(f, "mate"),
            ScoreType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Parses one `info ...` token stream. Returns `None` for lines with no (or
/// an empty) `pv`, which the driver silently discards.
pub fn parse_info_line(line: &str) -> Option<AnalysisLine> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.first() != Some(&"info") {
        return None;
    }

    let mut pv_index: u32 = 1;
    let mut score_type = ScoreType::Unknown;
    let mut score_value: i64 = 0;
    let mut depth: u32 = 0;
    let mut seldepth: u32 = 0;
    let mut nodes: u64 = 0;
    let mut nps: u64 = 0;
    let mut hashfull: u32 = 0;
    let mut pv_usi: Vec<String> = Vec::new();

    let mut i = 1;
    while i < tokens.len() {
        match tokens[i] {
            "pv" => {
                pv_usi = tokens[i + 1..].iter().map(|s| s.to_string()).collect();
                break;
            }
            "depth" | "seldepth" | "multipv" | "nodes" | "nps" | "hashfull" => {
                let key = tokens[i];
                if i + 1 < tokens.len() {
                    let value: i64 = tokens[i + 1].parse().unwrap_or(0);
                    match key {
                        "multipv" => pv_index = value.max(1) as u32,
                        "depth" => depth = value.max(0) as u32,
                        "seldepth" => seldepth = value.max(0) as u32,
                        "nodes" => nodes = value.max(0) as u64,
                        "nps" => nps = value.max(0) as u64,
                        "hashfull" => hashfull = value.max(0) as u32,
                        _ => unreachable!(),
                    }
                    i += 2;
                    continue;
                }
            }
            "score" => {
                if i + 2 < tokens.len() {
                    let kind = tokens[i + 1];
                    let value: i64 = tokens[i + 2].parse().unwrap_or(0);
                    if kind == "cp" || kind == "mate" {
                        score_type = if kind == "cp" { ScoreType::Cp } else { ScoreType::Mate };
                        score_value = value;
                    }
                    i += 3;
                    while i < tokens.len() && (tokens[i] == "upperbound" || tokens[i] == "lowerbound") {
                        i += 1;
                    }
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }

    if pv_usi.is_empty() {
        return None;
    }

    Some(AnalysisLine {
        pv_index,
        score_type,
        score_value,
        depth,
        seldepth,
        nodes,
        nps,
        hashfull,
        pv_usi,
    })
}

/// Parses `option name <NAME...> type ...` into just the name.
pub fn parse_option_name(line: &str) -> Option<String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 4 || tokens[0] != "option" || tokens[1] != "name" {
        return None;
    }
    let mut name_tokens = Vec::new();
    for tok in &tokens[2..] {
        if *tok == "type" {
            break;
        }
        name_tokens.push(*tok);
    }
    let name = name_tokens.join(" ");
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}
