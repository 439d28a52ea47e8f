use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;

use thiserror::Error;

use crate::mnemonic::Mnemonic;

/// Errors from reading the line-oriented script patch format.
#[derive(Debug, Error)]
pub enum PatchTextError {
    #[error("line {line} does not start a patch record (stray newline inside a body?): '{text}'")]
    StrayLine { line: usize, text: String },

    #[error("patch record on line {line} needs at least 4 fields, got {got}")]
    TooFewFields { line: usize, got: usize },

    #[error("unsupported pointer '{pointer}' on line {line}")]
    BadPointer { line: usize, pointer: String },

    #[error("unknown action '{action}' on line {line}")]
    UnknownAction { line: usize, action: String },

    #[error("action {action} on line {line} is missing its argument")]
    MissingArgument { line: usize, action: String },

    #[error("failed to parse integer '{token}' on line {line}")]
    ParseInt {
        line: usize,
        token: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("SetSVal value '{value}' on line {line} contains a comma, which the game reads as a field separator")]
    CommaInValue { line: usize, value: String },

    #[error("action {action} on line {line} needs a json body")]
    MissingBody { line: usize, action: String },

    #[error("action {action} on line {line} does not take a json body")]
    UnexpectedBody { line: usize, action: String },

    #[error("invalid json body for the record on line {line}: {source}")]
    BadBody {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Expected instruction at a patch target: `Nop:Main`, or just `MoveTo`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Anchor {
    pub mnemonic: String,
    pub label: Option<String>,
}

impl Anchor {
    pub fn new(mnemonic: &str, label: Option<&str>) -> Self {
        Anchor {
            mnemonic: mnemonic.to_string(),
            label: label.map(str::to_string),
        }
    }

    fn parse(text: &str) -> Option<Anchor> {
        let (mnemonic, label) = match text.split_once(':') {
            Some((m, l)) => (m, Some(l).filter(|l| !l.is_empty())),
            None => (text, None),
        };
        if mnemonic.is_empty() {
            return None;
        }
        Some(Anchor::new(mnemonic, label))
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{}:{}", self.mnemonic, label),
            None => f.write_str(&self.mnemonic),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PatchAction {
    /// Replace `span` instructions starting `skip` entries after the anchor.
    Overwrite {
        skip: usize,
        span: usize,
        body: Vec<Mnemonic>,
    },
    /// Set `operands.sValues[slot]` of the anchor instruction.
    SetSVal { slot: usize, value: String },
    /// Set individual `operands.iValues` entries of the anchor instruction.
    SpotIArray { values: BTreeMap<usize, i64> },
}

impl PatchAction {
    pub fn name(&self) -> &'static str {
        match self {
            PatchAction::Overwrite { .. } => "Overwrite",
            PatchAction::SetSVal { .. } => "SetSVal",
            PatchAction::SpotIArray { .. } => "SpotIArray",
        }
    }
}

/// One record of `script_patch.csv`.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptPatch {
    pub asset: String,
    /// Index into the script's `Mnemonics` array.
    pub index: usize,
    pub anchor: Option<Anchor>,
    pub action: PatchAction,
}

impl ScriptPatch {
    pub fn overwrite(asset: &str, index: usize, anchor: Anchor, skip: usize, body: Vec<Mnemonic>) -> Self {
        ScriptPatch {
            asset: asset.to_string(),
            index,
            anchor: Some(anchor),
            action: PatchAction::Overwrite {
                skip,
                span: body.len(),
                body,
            },
        }
    }

    fn pointer(&self) -> String {
        match self.action {
            PatchAction::SpotIArray { .. } => format!("/Mnemonics/[{}]/operands/iValues", self.index),
            _ => format!("/Mnemonics/[{}]", self.index),
        }
    }

    /// Render as a record followed by its blank-line terminator.
    pub fn render(&self) -> String {
        let anchor = self.anchor.as_ref().map(Anchor::to_string).unwrap_or_default();
        let mut out = format!("{},{},{},", self.asset, self.pointer(), anchor);

        match &self.action {
            PatchAction::Overwrite { skip, span, body } => {
                let _ = writeln!(out, "Overwrite,{},{}", skip, span);
                out.push_str("[\n");
                for (i, mnemonic) in body.iter().enumerate() {
                    // Serializing plain data into a String cannot fail.
                    let json = serde_json::to_string(mnemonic).unwrap_or_default();
                    out.push_str("  ");
                    out.push_str(&json);
                    out.push_str(if i + 1 < body.len() { ",\n" } else { "\n" });
                }
                out.push_str("]\n");
            }
            PatchAction::SetSVal { slot, value } => {
                let _ = writeln!(out, "SetSVal[{}],{}", slot, value);
            }
            PatchAction::SpotIArray { values } => {
                out.push_str("SpotIArray\n{");
                let entries: Vec<String> = values
                    .iter()
                    .map(|(index, value)| format!("\"{}\": {}", index, value))
                    .collect();
                out.push_str(&entries.join(", "));
                out.push_str("}\n");
            }
        }

        out.push('\n');
        out
    }
}

fn parse_int(line: usize, token: &str) -> Result<usize, PatchTextError> {
    let t = token.trim();
    t.parse::<usize>().map_err(|e| PatchTextError::ParseInt {
        line,
        token: t.to_string(),
        source: e,
    })
}

/// `/Mnemonics/[N]` or `/Mnemonics/[N]/operands/iValues`.
fn parse_pointer(line: usize, text: &str) -> Result<(usize, bool), PatchTextError> {
    let bad = || PatchTextError::BadPointer {
        line,
        pointer: text.to_string(),
    };
    let (head, ivalues) = match text.strip_suffix("/operands/iValues") {
        Some(head) => (head, true),
        None => (text, false),
    };
    let digits = head
        .strip_prefix("/Mnemonics/[")
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(bad)?;
    let index = digits.parse::<usize>().map_err(|_| bad())?;
    Ok((index, ivalues))
}

enum Pending {
    Overwrite { skip: usize, span: Option<usize> },
    SetSVal { slot: usize, value: String },
    SpotIArray,
}

struct Header {
    line: usize,
    asset: String,
    index: usize,
    anchor: Option<Anchor>,
    action: Pending,
}

fn parse_header(line_no: usize, line: &str) -> Result<Header, PatchTextError> {
    let parts: Vec<&str> = line.splitn(5, ',').collect();
    if parts.len() < 4 {
        return Err(PatchTextError::TooFewFields {
            line: line_no,
            got: parts.len(),
        });
    }

    let (index, ivalues) = parse_pointer(line_no, parts[1])?;
    let anchor = Anchor::parse(parts[2]);
    let action_tok = parts[3];
    let arg = parts.get(4).copied();

    let action = match action_tok {
        "Overwrite" => {
            let arg = arg.ok_or_else(|| PatchTextError::MissingArgument {
                line: line_no,
                action: action_tok.to_string(),
            })?;
            let (skip, span) = match arg.split_once(',') {
                Some((skip, span)) => (parse_int(line_no, skip)?, Some(parse_int(line_no, span)?)),
                None => (parse_int(line_no, arg)?, None),
            };
            Pending::Overwrite { skip, span }
        }
        "SpotIArray" => Pending::SpotIArray,
        other => {
            let Some(slot) = other
                .strip_prefix("SetSVal[")
                .and_then(|rest| rest.strip_suffix(']'))
            else {
                return Err(PatchTextError::UnknownAction {
                    line: line_no,
                    action: other.to_string(),
                });
            };
            let value = arg.ok_or_else(|| PatchTextError::MissingArgument {
                line: line_no,
                action: other.to_string(),
            })?;
            if value.contains(',') {
                return Err(PatchTextError::CommaInValue {
                    line: line_no,
                    value: value.to_string(),
                });
            }
            Pending::SetSVal {
                slot: parse_int(line_no, slot)?,
                value: value.to_string(),
            }
        }
    };

    // Only SpotIArray addresses the operand array itself.
    if ivalues != matches!(action, Pending::SpotIArray) {
        return Err(PatchTextError::BadPointer {
            line: line_no,
            pointer: parts[1].to_string(),
        });
    }

    Ok(Header {
        line: line_no,
        asset: parts[0].to_string(),
        index,
        anchor,
        action,
    })
}

fn finish(header: Header, body: &str) -> Result<ScriptPatch, PatchTextError> {
    let line = header.line;
    let body = body.trim();
    let bad_body = |source| PatchTextError::BadBody { line, source };

    let action = match header.action {
        Pending::Overwrite { skip, span } => {
            if body.is_empty() {
                return Err(PatchTextError::MissingBody {
                    line,
                    action: "Overwrite".to_string(),
                });
            }
            let body: Vec<Mnemonic> = serde_json::from_str(body).map_err(bad_body)?;
            PatchAction::Overwrite {
                skip,
                span: span.unwrap_or(body.len()),
                body,
            }
        }
        Pending::SetSVal { slot, value } => {
            if !body.is_empty() {
                return Err(PatchTextError::UnexpectedBody {
                    line,
                    action: "SetSVal".to_string(),
                });
            }
            PatchAction::SetSVal { slot, value }
        }
        Pending::SpotIArray => {
            if body.is_empty() {
                return Err(PatchTextError::MissingBody {
                    line,
                    action: "SpotIArray".to_string(),
                });
            }
            let raw: BTreeMap<String, i64> = serde_json::from_str(body).map_err(bad_body)?;
            let mut values = BTreeMap::new();
            for (key, value) in raw {
                values.insert(parse_int(line, &key)?, value);
            }
            PatchAction::SpotIArray { values }
        }
    };

    Ok(ScriptPatch {
        asset: header.asset,
        index: header.index,
        anchor: header.anchor,
        action,
    })
}

/// Parse a script patch file.
///
/// Record format (one line, comma separated):
///
/// - `<asset>,/Mnemonics/[N],<anchor>,Overwrite,<skip>[,<span>]` + json array body
/// - `<asset>,/Mnemonics/[N],<anchor>,SetSVal[<slot>],<value>` (no commas in `<value>`)
/// - `<asset>,/Mnemonics/[N]/operands/iValues,<anchor>,SpotIArray` + json object body
///
/// `<anchor>` is `Mnemonic[:Label]` or empty. A body runs until the next
/// blank line. Lines starting with `#` between records are comments.
pub fn parse_patch_text(src: &str) -> Result<Vec<ScriptPatch>, PatchTextError> {
    let mut patches = Vec::new();
    let mut pending: Option<Header> = None;
    let mut body = String::new();

    for (idx, raw_line) in src.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();

        if pending.is_some() {
            if !line.is_empty() {
                body.push_str(line);
                body.push('\n');
                continue;
            }
            if let Some(header) = pending.take() {
                patches.push(finish(header, &body)?);
            }
            body.clear();
            continue;
        }

        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !line.starts_with("Assets") {
            return Err(PatchTextError::StrayLine {
                line: line_no,
                text: line.to_string(),
            });
        }
        pending = Some(parse_header(line_no, line)?);
    }

    if let Some(header) = pending {
        patches.push(finish(header, &body)?);
    }
    Ok(patches)
}

pub fn render_patches(patches: &[ScriptPatch]) -> String {
    patches.iter().map(ScriptPatch::render).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASSET: &str = "Assets/GameAssets/Serial/Res/Map/Map_30041/Map_30041_8/sc_e_0017";

    #[test]
    fn parses_overwrite_with_default_span() {
        let src = format!(
            "# Patch: test\n{},/Mnemonics/[0],Nop:Main,Overwrite,4\n[\n{}\n]\n\n",
            ASSET,
            serde_json::to_string(&Mnemonic::nop("Shard1")).unwrap()
        );
        let patches = parse_patch_text(&src).unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].asset, ASSET);
        assert_eq!(patches[0].index, 0);
        assert_eq!(patches[0].anchor, Some(Anchor::new("Nop", Some("Main"))));
        match &patches[0].action {
            PatchAction::Overwrite { skip, span, body } => {
                assert_eq!(*skip, 4);
                assert_eq!(*span, 1);
                assert_eq!(body[0].label, "Shard1");
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn keeps_declared_span() {
        let src = format!(
            "{},/Mnemonics/[2],Nop,Overwrite,0,3\n[{}]\n",
            ASSET,
            serde_json::to_string(&Mnemonic::msg("A")).unwrap()
        );
        let patches = parse_patch_text(&src).unwrap();
        assert!(matches!(
            patches[0].action,
            PatchAction::Overwrite { span: 3, .. }
        ));
        assert_eq!(patches[0].anchor, Some(Anchor::new("Nop", None)));
    }

    #[test]
    fn parses_set_sval_and_spot_iarray() {
        let src = format!(
            "{a},/Mnemonics/[41],Msg,SetSVal[0],RANDO_MSG with space\n\n\
             {a},/Mnemonics/[12]/operands/iValues,MoveTo,SpotIArray\n{{\"2\": 14, \"0\": -1}}\n",
            a = ASSET
        );
        let patches = parse_patch_text(&src).unwrap();
        assert_eq!(
            patches[0].action,
            PatchAction::SetSVal {
                slot: 0,
                value: "RANDO_MSG with space".to_string()
            }
        );
        match &patches[1].action {
            PatchAction::SpotIArray { values } => {
                assert_eq!(values.get(&2), Some(&14));
                assert_eq!(values.get(&0), Some(&-1));
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn set_sval_value_may_not_hold_a_comma() {
        let src = format!("# header\n{},/Mnemonics/[41],Msg,SetSVal[0],RANDO_MSG,extra\n\n", ASSET);
        match parse_patch_text(&src) {
            Err(PatchTextError::CommaInValue { line, value }) => {
                assert_eq!(line, 2);
                assert_eq!(value, "RANDO_MSG,extra");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn reports_line_numbers() {
        let src = format!("# header\n\n{},/Mnemonics/[x],Nop,Overwrite,0\n[]\n", ASSET);
        match parse_patch_text(&src) {
            Err(PatchTextError::BadPointer { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected result {:?}", other),
        }

        let src = format!("{},/Mnemonics/[1],Nop,Explode,0\n[]\n", ASSET);
        assert!(matches!(
            parse_patch_text(&src),
            Err(PatchTextError::UnknownAction { line: 1, .. })
        ));

        let src = format!("{},/Mnemonics/[1],Nop,Overwrite,0\n[\n\n]\n", ASSET);
        assert!(matches!(
            parse_patch_text(&src),
            Err(PatchTextError::BadBody { line: 1, .. })
        ));
        // Anything after a body's blank terminator must start a new record.
        let src = format!("{},/Mnemonics/[1],Nop,Overwrite,0\n[]\n\n]\n", ASSET);
        assert!(matches!(
            parse_patch_text(&src),
            Err(PatchTextError::StrayLine { line: 4, .. })
        ));
    }

    #[test]
    fn rendered_records_parse_back() {
        let patches = vec![
            ScriptPatch::overwrite(
                ASSET,
                0,
                Anchor::new("Nop", Some("Main")),
                4,
                vec![Mnemonic::msg("RANDO_WIND_CRYSTAL_MSG_1"), Mnemonic::nop("Shard1")],
            ),
            ScriptPatch {
                asset: ASSET.to_string(),
                index: 9,
                anchor: None,
                action: PatchAction::SetSVal {
                    slot: 1,
                    value: "ScenarioFlag1".to_string(),
                },
            },
        ];
        let text = render_patches(&patches);
        assert!(text.contains("Nop:Main,Overwrite,4,2\n"));
        assert!(text.contains(",,SetSVal[1],ScenarioFlag1\n"));
        assert_eq!(parse_patch_text(&text).unwrap(), patches);
    }
}
