use super::Lead;

pub const CSV_HEADERS: [&str; 10] = [
    "Company",
    "Website",
    "Domain",
    "Industry",
    "Size",
    "Score",
    "Contact",
    "Email",
    "LinkedIn",
    "Personalization",
];

fn quote(cell: &str) -> String {
    format!("\"{}\"", cell.replace('"', "\"\""))
}

fn row(lead: &Lead) -> [String; 10] {
    let opt = |value: &Option<String>| value.clone().unwrap_or_default();
    [
        lead.company_name.clone(),
        opt(&lead.website),
        lead.domain.clone(),
        opt(&lead.industry),
        opt(&lead.company_size),
        lead.ai_score.to_string(),
        opt(&lead.contact_name),
        opt(&lead.email),
        opt(&lead.linkedin_url),
        opt(&lead.personalization),
    ]
}

/// Header line followed by one line per lead. Every data cell is quoted so commas,
/// quotes and newlines inside values survive.
pub fn render_csv(leads: &[Lead]) -> String {
    let mut lines = Vec::with_capacity(leads.len() + 1);
    lines.push(CSV_HEADERS.join(","));
    for lead in leads {
        let cells: Vec<String> = row(lead).iter().map(|cell| quote(cell)).collect();
        lines.push(cells.join(","));
    }
    lines.join("\n")
}
