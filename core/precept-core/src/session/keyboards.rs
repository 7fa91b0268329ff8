//! Callback identifiers and keyboard layouts.
//!
//! Button data is namespaced `prefix:action` so the state machine can match on
//! the namespace first and the action second.

use precept_protocol::{InlineButton, Keyboard};

pub const PROJECT_PREFIX: &str = "proj:";
pub const PAGE_PREFIX: &str = "page:";
pub const MENU_PREFIX: &str = "menu:";
pub const VISIT_PREFIX: &str = "visit:";
pub const TASK_PREFIX: &str = "task:";
pub const NOTE_PREFIX: &str = "note:";
pub const NOOP: &str = "noop";

pub const PROJECTS_PER_PAGE: usize = 6;

// Reply keyboard labels; taps arrive as plain text.
pub const LABEL_MENU: &str = "Menu";
pub const LABEL_STATUS: &str = "Status";
pub const LABEL_PROJECTS: &str = "Projects";
pub const LABEL_QUICK_NOTE: &str = "Quick note";
pub const LABEL_END_VISIT: &str = "End visit";
pub const LABEL_START_TASK: &str = "Start task";

/// A decoded button press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback<'a> {
    Project(&'a str),
    Page(usize),
    Menu(&'a str),
    Visit(&'a str),
    Task(&'a str),
    Note(&'a str),
    Noop,
    Unknown(&'a str),
}

pub fn parse_callback(data: &str) -> Callback<'_> {
    if data == NOOP {
        return Callback::Noop;
    }
    if let Some(name) = data.strip_prefix(PROJECT_PREFIX) {
        return Callback::Project(name);
    }
    if let Some(page) = data.strip_prefix(PAGE_PREFIX) {
        return match page.parse() {
            Ok(page) => Callback::Page(page),
            Err(_) => Callback::Unknown(data),
        };
    }
    if let Some(action) = data.strip_prefix(MENU_PREFIX) {
        return Callback::Menu(action);
    }
    if let Some(action) = data.strip_prefix(VISIT_PREFIX) {
        return Callback::Visit(action);
    }
    if let Some(action) = data.strip_prefix(TASK_PREFIX) {
        return Callback::Task(action);
    }
    if let Some(action) = data.strip_prefix(NOTE_PREFIX) {
        return Callback::Note(action);
    }
    Callback::Unknown(data)
}

fn button(label: &str, data: String) -> InlineButton {
    InlineButton::new(label, data)
}

fn menu(label: &str, action: &str) -> InlineButton {
    button(label, format!("{MENU_PREFIX}{action}"))
}

pub fn main_menu() -> Keyboard {
    Keyboard::Inline {
        rows: vec![
            vec![
                menu("Switch project", "switch_project"),
                menu("Status", "status"),
            ],
            vec![
                menu("Start site visit", "start_visit"),
                menu("Quick note", "quick_note"),
            ],
            vec![
                menu("Start task", "start_task"),
                menu("Search transcripts", "search"),
            ],
            vec![menu("Recent activity", "recent")],
        ],
    }
}

pub fn page_count(total: usize) -> usize {
    total.div_ceil(PROJECTS_PER_PAGE).max(1)
}

/// Paginated project list, two per row, with the active project first.
pub fn project_list(projects: &[String], active: Option<&str>, page: usize) -> Keyboard {
    let mut ordered: Vec<&String> = Vec::with_capacity(projects.len());
    if let Some(active) = active {
        ordered.extend(projects.iter().filter(|name| name.as_str() == active));
    }
    ordered.extend(
        projects
            .iter()
            .filter(|name| Some(name.as_str()) != active),
    );

    let pages = page_count(ordered.len());
    let page = page.min(pages - 1);
    let start = page * PROJECTS_PER_PAGE;

    let mut rows: Vec<Vec<InlineButton>> = ordered
        .iter()
        .skip(start)
        .take(PROJECTS_PER_PAGE)
        .map(|name| {
            let label = if Some(name.as_str()) == active {
                format!(">> {name}")
            } else {
                name.to_string()
            };
            button(&label, format!("{PROJECT_PREFIX}{name}"))
        })
        .collect::<Vec<_>>()
        .chunks(2)
        .map(<[InlineButton]>::to_vec)
        .collect();

    if pages > 1 {
        let mut nav = Vec::new();
        if page > 0 {
            nav.push(button("<< Prev", format!("{PAGE_PREFIX}{}", page - 1)));
        }
        nav.push(button(&format!("{}/{pages}", page + 1), NOOP.to_string()));
        if page + 1 < pages {
            nav.push(button("Next >>", format!("{PAGE_PREFIX}{}", page + 1)));
        }
        rows.push(nav);
    }

    rows.push(vec![
        menu("+ New project", "new_project"),
        menu("<< Back", "main"),
    ]);
    Keyboard::Inline { rows }
}

pub fn visit_confirm(project: &str) -> Keyboard {
    Keyboard::Inline {
        rows: vec![vec![
            button(&format!("Yes, visit {project}"), format!("{VISIT_PREFIX}confirm")),
            button("Switch project first", format!("{VISIT_PREFIX}switch_first")),
        ]],
    }
}

pub fn location_prompt() -> Keyboard {
    Keyboard::Inline {
        rows: vec![vec![button(
            "Skip location",
            format!("{VISIT_PREFIX}skip_location"),
        )]],
    }
}

pub fn end_visit_confirm() -> Keyboard {
    Keyboard::Inline {
        rows: vec![vec![
            button("End visit now", format!("{VISIT_PREFIX}end_confirm")),
            menu("<< Back", "main"),
        ]],
    }
}

pub fn finish_task() -> Keyboard {
    Keyboard::Inline {
        rows: vec![vec![button("Finish task", format!("{TASK_PREFIX}finish"))]],
    }
}

pub fn pending_note() -> Keyboard {
    Keyboard::Inline {
        rows: vec![vec![
            button("Yes, save", format!("{NOTE_PREFIX}save")),
            button("No, cancel", format!("{NOTE_PREFIX}discard")),
        ]],
    }
}

/// Persistent reply keyboard; the layout switches while a visit is running.
pub fn reply_keyboard(visit_active: bool) -> Keyboard {
    let rows = if visit_active {
        vec![
            vec![LABEL_QUICK_NOTE.to_string(), LABEL_END_VISIT.to_string()],
            vec![LABEL_START_TASK.to_string(), LABEL_STATUS.to_string()],
        ]
    } else {
        vec![
            vec![LABEL_MENU.to_string(), LABEL_STATUS.to_string()],
            vec![LABEL_PROJECTS.to_string(), LABEL_QUICK_NOTE.to_string()],
        ]
    };
    Keyboard::Reply { rows }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline_rows(keyboard: Keyboard) -> Vec<Vec<InlineButton>> {
        match keyboard {
            Keyboard::Inline { rows } => rows,
            Keyboard::Reply { .. } => panic!("expected inline keyboard"),
        }
    }

    fn projects(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("p{i:02}")).collect()
    }

    #[test]
    fn parses_namespaced_callbacks() {
        assert_eq!(parse_callback("proj:acme"), Callback::Project("acme"));
        assert_eq!(parse_callback("page:2"), Callback::Page(2));
        assert_eq!(parse_callback("menu:status"), Callback::Menu("status"));
        assert_eq!(parse_callback("visit:end"), Callback::Visit("end"));
        assert_eq!(parse_callback("task:finish"), Callback::Task("finish"));
        assert_eq!(parse_callback("note:save"), Callback::Note("save"));
        assert_eq!(parse_callback("noop"), Callback::Noop);
        assert_eq!(parse_callback("page:x"), Callback::Unknown("page:x"));
        assert_eq!(parse_callback("bogus"), Callback::Unknown("bogus"));
    }

    #[test]
    fn project_list_puts_active_first_and_paginates() {
        let names = projects(8);
        let rows = inline_rows(project_list(&names, Some("p05"), 0));

        assert_eq!(rows[0][0].label, ">> p05");
        assert_eq!(rows[0][0].data, "proj:p05");
        // Three rows of two, then nav, then new/back.
        assert_eq!(rows.len(), 5);
        let nav: Vec<&str> = rows[3].iter().map(|b| b.label.as_str()).collect();
        assert_eq!(nav, vec!["1/2", "Next >>"]);
        assert_eq!(rows[4][0].data, "menu:new_project");

        let rows = inline_rows(project_list(&names, Some("p05"), 1));
        assert_eq!(rows[0].len(), 2);
        let nav: Vec<&str> = rows[1].iter().map(|b| b.data.as_str()).collect();
        assert_eq!(nav, vec!["page:0", "noop"]);
    }

    #[test]
    fn short_project_list_has_no_nav_row() {
        let rows = inline_rows(project_list(&projects(3), None, 7));
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][0].label, "p02");
    }

    #[test]
    fn reply_keyboard_switches_during_visit() {
        let Keyboard::Reply { rows } = reply_keyboard(true) else {
            panic!("expected reply keyboard");
        };
        assert_eq!(rows[0], vec!["Quick note", "End visit"]);
    }
}
