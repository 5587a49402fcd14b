//! Node tables using comfy-table.

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use shepherd_cluster::{NodeInfo, NodeRole};

const HEADER: [&str; 6] = ["Server", "Role", "Site", "Host", "Port", "Status"];

fn role_color(role: NodeRole) -> Color {
    match role {
        NodeRole::Master => Color::Magenta,
        NodeRole::Slave => Color::Green,
        NodeRole::SearchHead => Color::Cyan,
        NodeRole::Forwarder | NodeRole::Unassigned => Color::DarkGrey,
    }
}

/// One row per node, in creation order.
pub fn node_table(nodes: &[NodeInfo]) -> Table {
    render_nodes(nodes, super::no_color())
}

fn render_nodes(nodes: &[NodeInfo], plain: bool) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(HEADER.iter().map(|title| {
        if plain {
            Cell::new(title)
        } else {
            Cell::new(title).add_attribute(Attribute::Bold).fg(Color::Cyan)
        }
    }));

    for node in nodes {
        let role = if plain {
            Cell::new(node.role)
        } else {
            Cell::new(node.role).fg(role_color(node.role))
        };
        // Multi-line statuses are summarised by their first line.
        let status = node.status.lines().next().unwrap_or_default().trim();
        table.add_row(vec![
            Cell::new(&node.server_name),
            role,
            Cell::new(node.site.map(|site| site.to_string()).unwrap_or_default()),
            Cell::new(&node.host),
            Cell::new(node.management_port),
            Cell::new(status),
        ]);
    }

    table
}
