//! Agent Prompts - templates for every language-model call in the pipeline
//!
//! Each template is a system/human pair with `{name}` placeholders that
//! [`PromptTemplate::render`] fills in. Literal JSON braces in the text are
//! left alone; only known placeholder names are substituted.

use serde::{Deserialize, Serialize};

/// Which pipeline stage a prompt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    IntentClassification,
    ContextResolution,
    StatementGeneration,
    StatementRepair,
    Interpretation,
}

#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub kind: PromptKind,
    pub system: &'static str,
    pub human: &'static str,
    pub temperature: f32,
}

/// A template with all placeholders filled in, ready for the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPrompt {
    pub kind: PromptKind,
    pub system: String,
    pub user: String,
    pub temperature: f32,
}

impl PromptTemplate {
    pub fn render(&self, vars: &[(&str, &str)]) -> RenderedPrompt {
        RenderedPrompt {
            kind: self.kind,
            system: fill(self.system, vars),
            user: fill(self.human, vars),
            temperature: self.temperature,
        }
    }
}

/// Substitute known `{name}` placeholders in one left-to-right pass.
/// Substituted values are never rescanned.
fn fill(text: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let hit = tail.find('}').and_then(|close| {
            let name = &tail[..close];
            vars.iter()
                .find(|(n, _)| *n == name)
                .map(|(_, value)| (close, *value))
        });
        match hit {
            Some((close, value)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Table description shared by the generation and repair prompts.
pub const DB_SCHEMA: &str = r#"
TABLE: app_metrics
COLUMNS:
- app_name (VARCHAR): mobile app name, e.g. "Paint for Android", "Countdown iOS"
- platform (VARCHAR): "iOS" or "Android"
- date (DATE): reporting day
- country (VARCHAR): country the metrics were recorded in
- installs (INTEGER): downloads
- in_app_revenue (DECIMAL): revenue from in-app purchases
- ads_revenue (DECIMAL): revenue from advertising
- ua_cost (DECIMAL): user acquisition (marketing) spend

DERIVED:
- total_revenue = in_app_revenue + ads_revenue
- net_revenue = total_revenue - ua_cost

NOTES:
- One row per app, platform, country and day
- Aggregate installs and revenue across dates with SUM()
- "Popular" means installs unless the user says otherwise
- Compare revenue on total_revenue unless a component is named
"#;

pub const FEW_SHOT_EXAMPLES: &str = r#"
Q: How many apps do we have?
SQL: SELECT COUNT(DISTINCT app_name) AS app_count FROM app_metrics;
Assumptions: Unique app names across both platforms.

Q: How many Android apps do we have?
SQL: SELECT COUNT(DISTINCT app_name) AS android_app_count FROM app_metrics WHERE platform = 'Android';
Assumptions: None.

Q: Which country generates the most revenue?
SQL: SELECT country, SUM(in_app_revenue + ads_revenue) AS total_revenue
     FROM app_metrics
     GROUP BY country
     ORDER BY total_revenue DESC
     LIMIT 10;
Assumptions: All dates. Revenue is in-app plus ads.

Q: List all iOS apps sorted by popularity
SQL: SELECT app_name, SUM(installs) AS total_installs
     FROM app_metrics
     WHERE platform = 'iOS'
     GROUP BY app_name
     ORDER BY total_installs DESC;
Assumptions: Popularity is total installs.

Q: Which apps changed UA spend the most between Dec 2024 and Jan 2025?
SQL: WITH jan AS (
       SELECT app_name, SUM(ua_cost) AS ua_jan FROM app_metrics
       WHERE date BETWEEN '2025-01-01' AND '2025-01-31' GROUP BY app_name
     ),
     dec AS (
       SELECT app_name, SUM(ua_cost) AS ua_dec FROM app_metrics
       WHERE date BETWEEN '2024-12-01' AND '2024-12-31' GROUP BY app_name
     )
     SELECT COALESCE(j.app_name, d.app_name) AS app_name,
            COALESCE(ua_jan, 0) - COALESCE(ua_dec, 0) AS ua_change
     FROM jan j FULL OUTER JOIN dec d ON j.app_name = d.app_name
     ORDER BY ABS(COALESCE(ua_jan, 0) - COALESCE(ua_dec, 0)) DESC;
Assumptions: Whole calendar months. Absolute change.
"#;

pub const INTENT_CLASSIFIER: PromptTemplate = PromptTemplate {
    kind: PromptKind::IntentClassification,
    system: r#"You classify messages sent to a mobile app analytics assistant.

Pick exactly ONE category:
- analytics_query: a new question about app data (installs, revenue, costs, countries, platforms)
- follow_up: a question that depends on earlier turns ("what about iOS?", "and last month?")
- export: a request to download or export results as CSV
- show_query: a request to see the SQL behind an answer
- off_topic: anything unrelated to app analytics

Reply with JSON only: {"intent": "<category>", "confidence": <0.0-1.0>}"#,
    human: r#"Conversation history:
{history}

Current message: {query}"#,
    temperature: 0.0,
};

pub const CONTEXT_RESOLVER: PromptTemplate = PromptTemplate {
    kind: PromptKind::ContextResolution,
    system: r#"You rewrite follow-up questions so they stand on their own.

Use the conversation history to fill in whatever the current question leaves
implicit (app, platform, metric, period). For example, after
"How many Android apps do we have?" the follow-up "what about iOS?" becomes
"How many iOS apps do we have?".

If the question is already self-contained, return it unchanged.
Return ONLY the rewritten question."#,
    human: r#"Conversation history:
{history}

Current question: {query}"#,
    temperature: 0.0,
};

pub const STATEMENT_GENERATOR: PromptTemplate = PromptTemplate {
    kind: PromptKind::StatementGeneration,
    system: r#"You write PostgreSQL queries for a mobile app analytics database.

SCHEMA:
{schema}

EXAMPLES:
{examples}

RULES:
1. Only SELECT (or WITH ... SELECT) statements. Never modify data.
2. Aggregate metrics with SUM, COUNT or AVG as appropriate.
3. Give computed columns readable aliases.
4. Add a LIMIT when the result could be large.
5. List every assumption you make about ambiguous wording.

Reply with JSON only:
{"statement": "<SQL>", "assumptions": ["...", "..."]}"#,
    human: "Question: {query}",
    temperature: 0.0,
};

pub const STATEMENT_REPAIR: PromptTemplate = PromptTemplate {
    kind: PromptKind::StatementRepair,
    system: r#"You fix PostgreSQL queries for a mobile app analytics database.
The previous query was rejected or failed; correct it using the error message.

SCHEMA:
{schema}

RULES:
1. Only SELECT (or WITH ... SELECT) statements. Never modify data.
2. Aggregate metrics with SUM, COUNT or AVG as appropriate.
3. Give computed columns readable aliases.
4. Add a LIMIT when the result could be large.

Reply with JSON only:
{"statement": "<corrected SQL>", "assumptions": ["...", "..."]}"#,
    human: r#"Question: {query}

Failing SQL:
{previous_statement}

Error: {error}

Return the corrected query."#,
    temperature: 0.0,
};

pub const INTERPRETER: PromptTemplate = PromptTemplate {
    kind: PromptKind::Interpretation,
    system: r#"You explain query results for a mobile app analytics assistant.

Summarise what the data says in plain language and point out anything notable.
Mention assumptions that change how the answer should be read.
For a single value, just state the answer. For tables, describe the overall picture.
Keep it short and do NOT repeat the raw rows; they are shown separately."#,
    human: r#"Question: {query}

Assumptions: {assumptions}

Rows returned: {row_count}
Columns: {columns}
Sample (up to 5 rows): {sample}"#,
    temperature: 0.3,
};
