use std::path::Path;

use shiftdb_db::{DiffSummary, TableInfo};

/// Render a diff as the lines `shiftdb plan` prints.
pub fn plan_lines(database: &Path, summary: &DiffSummary) -> Vec<String> {
    let mut lines = vec![format!("Plan for {}", display_path(database))];
    if summary.is_empty() {
        lines.push("  up to date, nothing to do".to_string());
        return lines;
    }

    for upgrade in &summary.migrate {
        lines.push(format!(
            "  migrate  {:<24} v{} -> v{}",
            upgrade.table, upgrade.from, upgrade.to
        ));
    }
    for table in &summary.remove {
        lines.push(format!("  remove   {table}"));
    }
    for table in &summary.create {
        lines.push(format!("  create   {table}"));
    }
    lines
}

/// Render the metadata table as the lines `shiftdb tables` prints.
pub fn table_lines(tables: &[TableInfo]) -> Vec<String> {
    if tables.is_empty() {
        return vec!["no managed tables".to_string()];
    }

    let width = tables
        .iter()
        .map(|t| t.table.len())
        .max()
        .unwrap_or(0)
        .max("TABLE".len());

    let mut lines = vec![format!(
        "{:<width$}  {:>7}  {:<20}  {:<20}",
        "TABLE", "VERSION", "CREATED", "MODIFIED"
    )];
    for info in tables {
        lines.push(format!(
            "{:<width$}  {:>7}  {:<20}  {:<20}",
            info.table,
            info.version,
            info.created.format("%Y-%m-%d %H:%M:%S").to_string(),
            info.modified.format("%Y-%m-%d %H:%M:%S").to_string(),
        ));
    }
    lines
}

fn display_path(path: &Path) -> String {
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => path.to_string_lossy().replace(&home, "~"),
        _ => path.to_string_lossy().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiftdb_db::TableUpgrade;

    #[test]
    fn empty_plan_says_up_to_date() {
        let lines = plan_lines(Path::new("/tmp/app.sqlite"), &DiffSummary::default());
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("up to date"));
    }

    #[test]
    fn plan_lists_steps_in_apply_order() {
        let summary = DiffSummary {
            create: vec!["fresh".into()],
            migrate: vec![TableUpgrade {
                table: "notes".into(),
                from: 1,
                to: 2,
            }],
            remove: vec!["old".into()],
        };
        let lines = plan_lines(Path::new("/tmp/app.sqlite"), &summary);
        assert!(lines[1].starts_with("  migrate  notes"));
        assert!(lines[1].ends_with("v1 -> v2"));
        assert_eq!(lines[2], "  remove   old");
        assert_eq!(lines[3], "  create   fresh");
    }

    #[test]
    fn no_tables_message() {
        assert_eq!(table_lines(&[]), vec!["no managed tables"]);
    }
}
