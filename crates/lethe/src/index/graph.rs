//! Relationship index over episodes
//!
//! Arena-style graph: relation nodes and entity adjacency are held in id
//! maps, never as linked object graphs. A multi-party event is one relation
//! node with an edge per participant (a hyperedge), so N-ary events survive
//! a binary-edge representation.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use uuid::Uuid;

use crate::error::{LetheError, Result};
use crate::memory::types::{Episode, Relation};

/// A relation node as stored in the index
#[derive(Debug, Clone)]
pub struct RelationNode {
    pub relation_id: Uuid,
    pub episode_id: Uuid,
    pub predicate: String,
    /// `(role, entity)` edges
    pub participants: Vec<(String, String)>,
}

#[derive(Default)]
struct GraphInner {
    relations: HashMap<Uuid, RelationNode>,
    /// entity -> relation ids it participates in
    by_entity: HashMap<String, HashSet<Uuid>>,
    /// relation identity key -> relation ids asserting it
    by_identity: HashMap<String, HashSet<Uuid>>,
    /// episode -> relation ids it asserted
    by_episode: HashMap<Uuid, HashSet<Uuid>>,
    /// entity -> episodes mentioning it (including relation-free mentions)
    entity_episodes: HashMap<String, BTreeSet<Uuid>>,
}

/// Concurrent relationship index shared by the episode store and the
/// consolidation engine
#[derive(Default)]
pub struct RelationGraph {
    inner: RwLock<GraphInner>,
}

impl RelationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, GraphInner>> {
        self.inner
            .read()
            .map_err(|_| LetheError::Storage("relation graph lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, GraphInner>> {
        self.inner
            .write()
            .map_err(|_| LetheError::Storage("relation graph lock poisoned".to_string()))
    }

    /// Index an episode's entities and relations under its id
    pub fn index_episode(&self, episode: &Episode) -> Result<()> {
        let mut inner = self.write()?;
        for entity in &episode.entities {
            inner
                .entity_episodes
                .entry(entity.clone())
                .or_default()
                .insert(episode.episode_id);
        }
        for relation in &episode.relations {
            insert_relation(&mut inner, episode.episode_id, relation);
        }
        Ok(())
    }

    /// Add an emergent cross-episode relation discovered by look-back linking
    pub fn link_episodes(&self, from: Uuid, to: Uuid, predicate: &str) -> Result<Uuid> {
        let relation = Relation::new(
            predicate,
            vec![
                crate::memory::types::Participant::new("from", from.to_string()),
                crate::memory::types::Participant::new("to", to.to_string()),
            ],
        );
        let id = relation.relation_id;
        let mut inner = self.write()?;
        insert_relation(&mut inner, from, &relation);
        Ok(id)
    }

    /// Episodes mentioning an entity, in id order
    pub fn episodes_for_entity(&self, entity: &str) -> Result<Vec<Uuid>> {
        let inner = self.read()?;
        Ok(inner
            .entity_episodes
            .get(entity)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    /// Relation nodes asserting the given identity key
    pub fn relations_for_identity(&self, identity_key: &str) -> Result<Vec<RelationNode>> {
        let inner = self.read()?;
        Ok(inner
            .by_identity
            .get(identity_key)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.relations.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Episodes asserting the given identity key
    pub fn episodes_for_identity(&self, identity_key: &str) -> Result<Vec<Uuid>> {
        let nodes = self.relations_for_identity(identity_key)?;
        let mut episodes: Vec<Uuid> = nodes.into_iter().map(|n| n.episode_id).collect();
        episodes.sort();
        episodes.dedup();
        Ok(episodes)
    }

    /// Relation nodes asserted by an episode
    pub fn relations_for_episode(&self, episode_id: Uuid) -> Result<Vec<RelationNode>> {
        let inner = self.read()?;
        Ok(inner
            .by_episode
            .get(&episode_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.relations.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Entities co-participating with `entity` in any relation (one hop)
    pub fn neighbors(&self, entity: &str) -> Result<Vec<String>> {
        let inner = self.read()?;
        let mut out: BTreeSet<String> = BTreeSet::new();
        if let Some(relation_ids) = inner.by_entity.get(entity) {
            for id in relation_ids {
                if let Some(node) = inner.relations.get(id) {
                    for (_, other) in &node.participants {
                        if other != entity {
                            out.insert(other.clone());
                        }
                    }
                }
            }
        }
        Ok(out.into_iter().collect())
    }

    pub fn relation_count(&self) -> usize {
        self.inner.read().map(|g| g.relations.len()).unwrap_or(0)
    }
}

fn insert_relation(inner: &mut GraphInner, episode_id: Uuid, relation: &Relation) {
    let node = RelationNode {
        relation_id: relation.relation_id,
        episode_id,
        predicate: relation.predicate.clone(),
        participants: relation
            .participants
            .iter()
            .map(|p| (p.role.clone(), p.entity.clone()))
            .collect(),
    };

    for p in &relation.participants {
        inner
            .by_entity
            .entry(p.entity.clone())
            .or_default()
            .insert(relation.relation_id);
        inner
            .entity_episodes
            .entry(p.entity.clone())
            .or_default()
            .insert(episode_id);
    }
    inner
        .by_identity
        .entry(relation.identity_key())
        .or_default()
        .insert(relation.relation_id);
    inner
        .by_episode
        .entry(episode_id)
        .or_default()
        .insert(relation.relation_id);
    inner.relations.insert(relation.relation_id, node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{EpisodeSource, Participant};
    use chrono::Utc;

    fn episode_with(relations: Vec<Relation>, entities: Vec<&str>) -> Episode {
        Episode {
            episode_id: Uuid::new_v4(),
            session_id: "s".to_string(),
            summary: "summary".to_string(),
            entities: entities.into_iter().map(String::from).collect(),
            relations,
            embedding: vec![],
            valid_from: Utc::now(),
            valid_to: None,
            observed_at: Utc::now(),
            source_type: EpisodeSource::Conversation,
            source_fact_ids: vec![],
            mined: false,
        }
    }

    #[test]
    fn test_hyperedge_preserves_all_participants() {
        let graph = RelationGraph::new();
        let relation = Relation::new(
            "purchased",
            vec![
                Participant::new("buyer", "alice"),
                Participant::new("seller", "bob"),
                Participant::new("item", "bicycle"),
            ],
        );
        let key = relation.identity_key();
        let episode = episode_with(vec![relation], vec![]);
        graph.index_episode(&episode).unwrap();

        let nodes = graph.relations_for_identity(&key).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].participants.len(), 3);

        // Every participant reaches the same relation node
        for entity in ["alice", "bob", "bicycle"] {
            assert_eq!(
                graph.episodes_for_entity(entity).unwrap(),
                vec![episode.episode_id]
            );
        }
    }

    #[test]
    fn test_neighbors_cross_hyperedge() {
        let graph = RelationGraph::new();
        let episode = episode_with(
            vec![Relation::new(
                "purchased",
                vec![
                    Participant::new("buyer", "alice"),
                    Participant::new("seller", "bob"),
                    Participant::new("item", "bicycle"),
                ],
            )],
            vec![],
        );
        graph.index_episode(&episode).unwrap();

        assert_eq!(graph.neighbors("alice").unwrap(), vec!["bicycle", "bob"]);
        assert!(graph.neighbors("unknown").unwrap().is_empty());
    }

    #[test]
    fn test_episodes_for_identity_dedupes() {
        let graph = RelationGraph::new();
        let make = || {
            Relation::new(
                "works_at",
                vec![
                    Participant::new("subject", "alice"),
                    Participant::new("org", "acme"),
                ],
            )
        };
        let key = make().identity_key();

        let e1 = episode_with(vec![make()], vec![]);
        let e2 = episode_with(vec![make()], vec![]);
        graph.index_episode(&e1).unwrap();
        graph.index_episode(&e2).unwrap();

        let episodes = graph.episodes_for_identity(&key).unwrap();
        assert_eq!(episodes.len(), 2);
    }

    #[test]
    fn test_entity_mention_without_relation() {
        let graph = RelationGraph::new();
        let episode = episode_with(vec![], vec!["carol"]);
        graph.index_episode(&episode).unwrap();
        assert_eq!(
            graph.episodes_for_entity("carol").unwrap(),
            vec![episode.episode_id]
        );
    }

    #[test]
    fn test_link_episodes() {
        let graph = RelationGraph::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        graph.link_episodes(a, b, "relates_to").unwrap();

        let nodes = graph.relations_for_episode(a).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].predicate, "relates_to");
        assert_eq!(graph.relation_count(), 1);
    }
}
