//! In-memory CRM for tests

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{
    fields, Condition, CrmApi, CrmError, CrmResult, Domain, Operator, Record, RecordId,
    SearchOptions,
};

#[derive(Default)]
pub struct FakeCrm {
    models: HashMap<String, Vec<Record>>,
    failing: HashSet<String>,
    shuffle_ties: bool,
    searches: Mutex<HashMap<String, usize>>,
    orders: Mutex<Vec<String>>,
    reads: Mutex<HashMap<String, usize>>,
}

impl FakeCrm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add records to a model; each value must be an object with an `id`
    pub fn with_records(mut self, model: &str, records: Vec<Value>) -> Self {
        let entry = self.models.entry(model.to_string()).or_default();
        entry.extend(records.into_iter().filter_map(|r| r.as_object().cloned()));
        self
    }

    /// Every call against this model fails
    pub fn failing(mut self, model: &str) -> Self {
        self.failing.insert(model.to_string());
        self
    }

    /// Rows that tie on the sort field come back in a different order on every other search
    pub fn shuffling_ties(mut self) -> Self {
        self.shuffle_ties = true;
        self
    }

    /// Sort clauses received, in call order
    pub fn orders(&self) -> Vec<String> {
        self.orders.lock().unwrap().clone()
    }

    pub fn search_calls(&self, model: &str) -> usize {
        self.searches.lock().unwrap().get(model).copied().unwrap_or(0)
    }

    pub fn read_calls(&self, model: &str) -> usize {
        self.reads.lock().unwrap().get(model).copied().unwrap_or(0)
    }

    fn check(&self, model: &str) -> CrmResult<()> {
        if self.failing.contains(model) {
            return Err(CrmError::Rpc {
                message: format!("{} is unavailable", model),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CrmApi for FakeCrm {
    async fn search(
        &self,
        model: &str,
        domain: &Domain,
        options: &SearchOptions,
    ) -> CrmResult<Vec<RecordId>> {
        let call = {
            let mut searches = self.searches.lock().unwrap();
            let count = searches.entry(model.to_string()).or_default();
            *count += 1;
            *count
        };
        self.orders
            .lock()
            .unwrap()
            .push(options.order.clone().unwrap_or_default());
        self.check(model)?;
        let reverse_ties = self.shuffle_ties && call % 2 == 0;

        let mut matched: Vec<&Record> = self
            .models
            .get(model)
            .map(|records| records.iter().filter(|r| satisfies(r, domain)).collect())
            .unwrap_or_default();

        let (field, descending) = parse_order(options.order.as_deref());
        matched.sort_by(|a, b| {
            let ord = compare(a.get(field), b.get(field));
            let ord = if descending { ord.reverse() } else { ord };
            let ties = fields::id(a).cmp(&fields::id(b));
            ord.then(if reverse_ties { ties.reverse() } else { ties })
        });

        Ok(matched
            .into_iter()
            .filter_map(fields::id)
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn read(&self, model: &str, ids: &[RecordId], wanted: &[&str]) -> CrmResult<Vec<Record>> {
        *self.reads.lock().unwrap().entry(model.to_string()).or_default() += 1;
        self.check(model)?;

        let records = self.models.get(model).map(Vec::as_slice).unwrap_or(&[]);
        Ok(ids
            .iter()
            .filter_map(|id| records.iter().find(|r| fields::id(r) == Some(*id)))
            .map(|record| {
                let mut out = Record::new();
                out.insert("id".to_string(), record["id"].clone());
                for field in wanted {
                    let value = record.get(*field).cloned().unwrap_or(Value::Bool(false));
                    out.insert(field.to_string(), value);
                }
                out
            })
            .collect())
    }
}

fn parse_order(order: Option<&str>) -> (&str, bool) {
    let mut parts = order.unwrap_or("id").split_whitespace();
    let field = parts.next().unwrap_or("id");
    let descending = parts.next().is_some_and(|d| d.eq_ignore_ascii_case("desc"));
    (field, descending)
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => ordering(a, b).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn satisfies(record: &Record, domain: &Domain) -> bool {
    domain.conditions().iter().all(|c| holds(record, c))
}

fn scalar(value: &Value) -> &Value {
    match value {
        Value::Array(pair) if pair.len() == 2 && pair[0].is_i64() => &pair[0],
        other => other,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Bool(false) | Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn holds(record: &Record, condition: &Condition) -> bool {
    let missing = Value::Bool(false);
    let actual = record.get(&condition.field).unwrap_or(&missing);
    let expected = &condition.value;

    match condition.op {
        Operator::Eq => scalar(actual) == expected,
        Operator::NotEq if expected == &Value::Bool(false) => !is_empty(actual),
        Operator::NotEq => scalar(actual) != expected,
        Operator::Gte => matches!(
            ordering(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::Lt => ordering(actual, expected) == Some(Ordering::Less),
        Operator::ILike => ilike(actual, expected),
        Operator::NotILike => !ilike(actual, expected),
        Operator::In => expected
            .as_array()
            .is_some_and(|options| options.contains(scalar(actual))),
    }
}

fn ilike(actual: &Value, pattern: &Value) -> bool {
    match (actual.as_str(), pattern.as_str()) {
        (Some(text), Some(pattern)) => text
            .to_lowercase()
            .contains(&pattern.replace('%', "").to_lowercase()),
        _ => false,
    }
}
