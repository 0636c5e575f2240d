//! Records produced by the catalog source.

use crate::watermark::Watermark;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A person credited on a film, as embedded in the search document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRef {
    pub id: Uuid,
    pub name: String,
}

/// One film flattened with its genres and credited persons, in the shape
/// of the `movies` index documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmDocument {
    pub id: Uuid,
    pub imdb_rating: Option<f64>,
    pub genre: Vec<String>,
    pub title: String,
    pub description: Option<String>,
    pub director: Vec<String>,
    pub actors_names: Vec<String>,
    pub writers_names: Vec<String>,
    pub actors: Vec<PersonRef>,
    pub writers: Vec<PersonRef>,
}

/// A film affected by changes after the watermark, with the latest of the
/// contributing change times (film itself, a credited person or a genre).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFilm {
    pub id: Uuid,
    pub modified: DateTime<Utc>,
}

/// Films to re-index, ordered by ascending change time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    films: Vec<ChangedFilm>,
}

impl ChangeSet {
    pub fn new(films: Vec<ChangedFilm>) -> Self {
        Self { films }
    }

    pub fn is_empty(&self) -> bool {
        self.films.is_empty()
    }

    pub fn len(&self) -> usize {
        self.films.len()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.films.iter().map(|f| f.id).collect()
    }

    /// The watermark to persist once every film of the set is indexed.
    pub fn max_modified(&self) -> Option<Watermark> {
        self.films
            .iter()
            .map(|f| f.modified)
            .max()
            .map(Watermark::from_instant)
    }
}
