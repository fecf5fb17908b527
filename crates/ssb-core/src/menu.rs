//! Declarative menu graph: load, validate, resolve, reload.
//!
//! The graph is operator-curated JSON. Everything that can be wrong with it
//! is rejected at load time: unknown fields, dangling navigation targets,
//! unknown actions, unresolvable placeholders, malformed link URLs. A failed
//! `reload()` leaves the previous graph serving.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, RwLock},
};

use regex::Regex;
use serde::Deserialize;

use crate::{
    errors::Error,
    messaging::types::{InlineButton, InlineKeyboard},
    Result,
};

/// Name of the entry screen; must exist in every valid graph.
pub const MAIN_MENU: &str = "main_menu";

/// Feature-trigger actions a button may carry (everything else is a menu
/// name or an external link).
pub const ACTION_ASK_NEURO: &str = "ask_neuro";
pub const ACTION_CHECK_SUBSCRIPTION: &str = "check_subscription";

const KNOWN_ACTIONS: &[&str] = &[ACTION_ASK_NEURO, ACTION_CHECK_SUBSCRIPTION];

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MenuFile {
    menus: Vec<MenuSpec>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MenuSpec {
    name: String,
    text: String,
    #[serde(default)]
    rows: Vec<Vec<ButtonSpec>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum ButtonSpec {
    Nav(NavButton),
    Link(LinkButton),
    Action(ActionButton),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NavButton {
    label: String,
    menu: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinkButton {
    label: String,
    url: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActionButton {
    label: String,
    action: String,
}

/// One screen: display text plus its button layout.
#[derive(Clone, Debug)]
pub struct MenuNode {
    pub text: String,
    pub keyboard: InlineKeyboard,
}

#[derive(Clone, Debug, Default)]
pub struct MenuGraph {
    nodes: HashMap<String, MenuNode>,
}

impl MenuGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Registry serving the current graph to all sessions.
///
/// Readers clone an `Arc` snapshot; `reload()` swaps the snapshot only after
/// the candidate graph passed full validation.
pub struct MenuRegistry {
    path: PathBuf,
    vars: HashMap<String, String>,
    graph: RwLock<Arc<MenuGraph>>,
}

impl MenuRegistry {
    pub fn load(path: PathBuf, vars: HashMap<String, String>) -> Result<Self> {
        let graph = read_and_build(&path, &vars)?;
        Ok(Self {
            path,
            vars,
            graph: RwLock::new(Arc::new(graph)),
        })
    }

    pub fn resolve(&self, name: &str) -> Result<MenuNode> {
        let graph = self.snapshot();
        graph
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::MenuNotFound(name.to_string()))
    }

    /// Re-read the source and atomically swap the graph. On any validation
    /// failure the previous graph stays in effect and the error is returned.
    pub fn reload(&self) -> Result<usize> {
        let graph = read_and_build(&self.path, &self.vars)?;
        let len = graph.len();
        let mut guard = self.graph.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(graph);
        Ok(len)
    }

    pub fn screen_count(&self) -> usize {
        self.snapshot().len()
    }

    fn snapshot(&self) -> Arc<MenuGraph> {
        self.graph
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn read_and_build(path: &PathBuf, vars: &HashMap<String, String>) -> Result<MenuGraph> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read menu file {}: {e}", path.display())))?;
    build_graph(&source, vars)
}

fn build_graph(source: &str, vars: &HashMap<String, String>) -> Result<MenuGraph> {
    let file: MenuFile = serde_json::from_str(source)
        .map_err(|e| Error::Config(format!("menu config is malformed: {e}")))?;

    let mut nodes: HashMap<String, MenuNode> = HashMap::new();
    for spec in &file.menus {
        if nodes.contains_key(&spec.name) {
            return Err(Error::Config(format!("duplicate menu `{}`", spec.name)));
        }

        let mut rows = Vec::with_capacity(spec.rows.len());
        for row in &spec.rows {
            let mut buttons = Vec::with_capacity(row.len());
            for button in row {
                buttons.push(build_button(&spec.name, button, vars)?);
            }
            rows.push(buttons);
        }

        nodes.insert(
            spec.name.clone(),
            MenuNode {
                text: substitute(&spec.text, vars)?,
                keyboard: InlineKeyboard::new(rows),
            },
        );
    }

    if !nodes.contains_key(MAIN_MENU) {
        return Err(Error::Config(format!("menu `{MAIN_MENU}` is required")));
    }

    // Every navigation target must resolve now, not on first button press.
    for spec in &file.menus {
        for button in spec.rows.iter().flatten() {
            if let ButtonSpec::Nav(nav) = button {
                if !nodes.contains_key(&nav.menu) {
                    return Err(Error::Config(format!(
                        "menu `{}` links to unknown menu `{}`",
                        spec.name, nav.menu
                    )));
                }
            }
        }
    }

    Ok(MenuGraph { nodes })
}

fn build_button(
    menu: &str,
    spec: &ButtonSpec,
    vars: &HashMap<String, String>,
) -> Result<InlineButton> {
    match spec {
        ButtonSpec::Nav(b) => Ok(InlineButton::callback(
            substitute(&b.label, vars)?,
            b.menu.clone(),
        )),
        ButtonSpec::Link(b) => {
            let href = substitute(&b.url, vars)?;
            url::Url::parse(&href).map_err(|e| {
                Error::Config(format!("menu `{menu}` has invalid url `{href}`: {e}"))
            })?;
            Ok(InlineButton::url(substitute(&b.label, vars)?, href))
        }
        ButtonSpec::Action(b) => {
            if !KNOWN_ACTIONS.contains(&b.action.as_str()) {
                return Err(Error::Config(format!(
                    "menu `{menu}` has unknown action `{}`",
                    b.action
                )));
            }
            Ok(InlineButton::callback(
                substitute(&b.label, vars)?,
                b.action.clone(),
            ))
        }
    }
}

/// `{name}` placeholders in labels, texts and URLs. A placeholder with no
/// configured value is a load-time error, never a lazy per-button failure.
fn substitute(input: &str, vars: &HashMap<String, String>) -> Result<String> {
    let re = Regex::new(r"\{([a-z_]+)\}").expect("valid regex");

    let mut out = String::with_capacity(input.len());
    let mut last = 0usize;
    for caps in re.captures_iter(input) {
        let whole = caps.get(0).expect("capture 0 always present");
        let key = &caps[1];
        let Some(value) = vars.get(key) else {
            return Err(Error::Config(format!(
                "unresolved placeholder `{{{key}}}` in `{input}`"
            )));
        };
        out.push_str(&input[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}
