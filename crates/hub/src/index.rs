use std::collections::{HashMap, HashSet};

use crate::ConnectionId;

/// Multimapa tópico → conexões interessadas.
///
/// Nunca guarda um tópico com conjunto vazio: a última remoção apaga a
/// entrada. Só é mutado de dentro do loop do coordenador, então não tem lock.
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    topics: HashMap<String, HashSet<ConnectionId>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inscreve a conexão no tópico. Retorna `false` se já estava inscrita.
    pub fn insert(&mut self, key: &str, id: ConnectionId) -> bool {
        self.topics.entry(key.to_string()).or_default().insert(id)
    }

    /// Remove a conexão do tópico, apagando o tópico se ficou vazio.
    pub fn remove(&mut self, key: &str, id: ConnectionId) -> bool {
        let Some(members) = self.topics.get_mut(key) else {
            return false;
        };
        let removed = members.remove(&id);
        if members.is_empty() {
            self.topics.remove(key);
        }
        removed
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&HashSet<ConnectionId>> {
        self.topics.get(key)
    }

    /// Cópia dos membros do tópico (vazia se o tópico não existe).
    pub fn members(&self, key: &str) -> Vec<ConnectionId> {
        self.topics
            .get(key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str, id: ConnectionId) -> bool {
        self.topics.get(key).is_some_and(|set| set.contains(&id))
    }

    /// Número de tópicos com pelo menos uma conexão.
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Verdadeiro se a conexão aparece em algum tópico. Varre o índice todo.
    #[cfg(test)]
    pub fn references(&self, id: ConnectionId) -> bool {
        self.topics.values().any(|set| set.contains(&id))
    }
}
