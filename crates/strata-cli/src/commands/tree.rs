use super::{collect_infos, colorize_kind, json_pretty, kind_label, CliError, EXIT_SUCCESS};
use serde::Serialize;
use std::collections::BTreeMap;
use strata_core::{Engine, Info};

#[derive(Debug, Serialize)]
struct Node<'a> {
    name: &'a str,
    kind: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<Node<'a>>,
}

fn build<'a>(
    name: &'a str,
    infos: &BTreeMap<&'a str, &'a Info>,
    by_parent: &BTreeMap<&str, Vec<&'a str>>,
) -> Node<'a> {
    let kind = infos.get(name).map_or("missing", |i| kind_label(i));
    let children = by_parent
        .get(name)
        .map(|kids| kids.iter().map(|&k| build(k, infos, by_parent)).collect())
        .unwrap_or_default();
    Node {
        name,
        kind,
        children,
    }
}

/// Arrange records into a forest. Records whose parent is not present are
/// treated as roots, so nothing is hidden from the listing.
fn forest(infos: &[Info]) -> Vec<Node<'_>> {
    let by_name: BTreeMap<&str, &Info> = infos.iter().map(|i| (i.name.as_str(), i)).collect();
    let mut by_parent: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut roots = Vec::new();
    for info in infos {
        match &info.parent {
            Some(p) if by_name.contains_key(p.as_str()) => {
                by_parent
                    .entry(p.as_str())
                    .or_default()
                    .push(info.name.as_str());
            }
            _ => roots.push(info.name.as_str()),
        }
    }
    for kids in by_parent.values_mut() {
        kids.sort_unstable();
    }
    roots.sort_unstable();
    roots
        .into_iter()
        .map(|r| build(r, &by_name, &by_parent))
        .collect()
}

fn render_node(
    node: &Node<'_>,
    prefix: &str,
    last: bool,
    top: bool,
    color: bool,
    out: &mut String,
) {
    let label = if color {
        colorize_kind(node.kind)
    } else {
        node.kind.to_owned()
    };
    if top {
        out.push_str(&format!("{} ({label})\n", node.name));
    } else {
        let branch = if last { "└── " } else { "├── " };
        out.push_str(&format!("{prefix}{branch}{} ({label})\n", node.name));
    }
    let child_prefix = if top {
        String::new()
    } else if last {
        format!("{prefix}    ")
    } else {
        format!("{prefix}│   ")
    };
    for (i, child) in node.children.iter().enumerate() {
        let last_child = i + 1 == node.children.len();
        render_node(child, &child_prefix, last_child, false, color, out);
    }
}

/// Render the lineage as an indented tree, one line per record.
pub fn render_tree(infos: &[Info], color: bool) -> String {
    let mut out = String::new();
    for root in forest(infos) {
        render_node(&root, "", true, true, color, &mut out);
    }
    out
}

pub fn run(engine: &Engine, json: bool) -> Result<u8, CliError> {
    let infos = collect_infos(engine)?;
    if json {
        println!("{}", json_pretty(&forest(&infos))?);
    } else if infos.is_empty() {
        println!("no snapshots found");
    } else {
        print!("{}", render_tree(&infos, true));
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Kind;
    use strata_store::SnapshotKey;

    fn info(name: &str, parent: Option<&str>, kind: Kind, readonly: bool) -> Info {
        Info {
            name: SnapshotKey::new(name),
            parent: parent.map(SnapshotKey::new),
            kind,
            readonly,
            children: 0,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn renders_nested_lineage() {
        let infos = vec![
            info("base", None, Kind::Committed, false),
            info("app", Some("base"), Kind::Committed, false),
            info("work", Some("app"), Kind::Active, false),
            info("peek", Some("base"), Kind::Active, true),
            info("other", None, Kind::Active, false),
        ];
        let text = render_tree(&infos, false);
        assert_eq!(
            text,
            "base (committed)\n\
             ├── app (committed)\n\
             │   └── work (active)\n\
             └── peek (view)\n\
             other (active)\n"
        );
    }

    #[test]
    fn orphan_is_listed_as_root() {
        let infos = vec![info("lost", Some("gone"), Kind::Active, false)];
        assert_eq!(render_tree(&infos, false), "lost (active)\n");
    }

    #[test]
    fn forest_serializes_nested() {
        let infos = vec![
            info("base", None, Kind::Committed, false),
            info("work", Some("base"), Kind::Active, false),
        ];
        let json = serde_json::to_value(forest(&infos)).unwrap();
        assert_eq!(json[0]["name"], "base");
        assert_eq!(json[0]["children"][0]["kind"], "active");
        assert!(json[0]["children"][0].get("children").is_none());
    }
}
