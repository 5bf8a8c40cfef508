use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::info;

use crate::sources::ResolvedEntry;

#[derive(Debug, Clone)]
pub struct QueuedEntry {
    pub entry: ResolvedEntry,
    #[allow(dead_code)]
    pub added_at: DateTime<Utc>,
}

impl From<ResolvedEntry> for QueuedEntry {
    fn from(entry: ResolvedEntry) -> Self {
        Self {
            entry,
            added_at: Utc::now(),
        }
    }
}

/// Cola FIFO de entradas pendientes más la entrada en reproducción.
///
/// La cabeza es siempre la próxima en sonar. La entrada actual sólo se
/// limpia al destruir la sesión o al reemplazarla por la siguiente.
#[derive(Debug, Default)]
pub struct PlayQueue {
    items: VecDeque<QueuedEntry>,
    current: Option<ResolvedEntry>,
}

impl PlayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega una entrada al final de la cola.
    pub fn push(&mut self, entry: ResolvedEntry) {
        info!("➕ Agregado a la cola: {}", entry.title());
        self.items.push_back(QueuedEntry::from(entry));
    }

    /// Saca la siguiente entrada en estricto orden FIFO.
    pub fn pop_next(&mut self) -> Option<ResolvedEntry> {
        self.items.pop_front().map(|item| item.entry)
    }

    pub fn set_current(&mut self, entry: ResolvedEntry) {
        self.current = Some(entry);
    }

    pub fn current(&self) -> Option<&ResolvedEntry> {
        self.current.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Vacía la cola y olvida la entrada actual.
    pub fn clear(&mut self) {
        self.items.clear();
        self.current = None;
    }

    /// Recolecta los títulos que cubre un salto de `count` canciones: la
    /// actual más hasta `count - 1` sacadas de la cabeza de la cola.
    ///
    /// Sin entrada actual no se muta nada y se devuelve `None`.
    pub fn collect_skipped(&mut self, count: usize) -> Option<Vec<String>> {
        let current = self.current.as_ref()?;
        let mut titles = vec![current.title().to_string()];
        for _ in 1..count {
            match self.items.pop_front() {
                Some(item) => titles.push(item.entry.title().to_string()),
                None => break,
            }
        }
        Some(titles)
    }

    /// Instantánea para mostrar la cola al usuario.
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current: self.current.as_ref().map(|e| e.title().to_string()),
            upcoming: self
                .items
                .iter()
                .map(|item| item.entry.title().to_string())
                .collect(),
        }
    }
}

/// Vista de sólo lectura de la cola de un servidor.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    pub current: Option<String>,
    pub upcoming: Vec<String>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn entry(title: &str) -> ResolvedEntry {
        ResolvedEntry::new(
            title.to_string(),
            format!("https://youtube.com/watch?v={title}"),
            format!("https://cdn.example.com/{title}.webm"),
            "webm".to_string(),
            "opus".to_string(),
        )
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = PlayQueue::new();
        queue.push(entry("A"));
        queue.push(entry("B"));
        queue.push(entry("C"));

        assert_eq!(queue.pop_next().unwrap().title(), "A");
        assert_eq!(queue.pop_next().unwrap().title(), "B");
        assert_eq!(queue.pop_next().unwrap().title(), "C");
        assert!(queue.pop_next().is_none());
    }

    #[test]
    fn test_skip_pops_count_minus_one() {
        let mut queue = PlayQueue::new();
        queue.set_current(entry("X"));
        for title in ["A", "B", "C", "D"] {
            queue.push(entry(title));
        }

        let titles = queue.collect_skipped(3).unwrap();
        assert_eq!(titles, vec!["X", "A", "B"]);
        // Quedan C y D; C es la próxima en sonar
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_next().unwrap().title(), "C");
        assert_eq!(queue.pop_next().unwrap().title(), "D");
    }

    #[test]
    fn test_skip_with_short_queue_stops_early() {
        let mut queue = PlayQueue::new();
        queue.set_current(entry("X"));
        queue.push(entry("A"));

        let titles = queue.collect_skipped(5).unwrap();
        assert_eq!(titles, vec!["X", "A"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_skip_without_current_does_not_mutate() {
        let mut queue = PlayQueue::new();
        queue.push(entry("A"));
        queue.push(entry("B"));

        assert!(queue.collect_skipped(2).is_none());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_snapshot_and_clear() {
        let mut queue = PlayQueue::new();
        queue.set_current(entry("X"));
        queue.push(entry("A"));

        let snap = queue.snapshot();
        assert_eq!(snap.current.as_deref(), Some("X"));
        assert_eq!(snap.upcoming, vec!["A"]);

        queue.clear();
        let snap = queue.snapshot();
        assert_eq!(snap.current, None);
        assert!(snap.upcoming.is_empty());
    }

    #[test]
    fn test_current_survives_until_cleared() {
        let mut queue = PlayQueue::new();
        queue.set_current(entry("X"));
        assert_eq!(queue.current().unwrap().title(), "X");

        // Sacar de la cola no toca la entrada actual
        queue.push(entry("A"));
        queue.pop_next();
        assert_eq!(queue.current().unwrap().title(), "X");
    }
}
