//! Read queries against the `content` schema.

/// Name of the server-side cursor used for film scans.
pub const FILM_CURSOR: &str = "film_scan";

/// Latest change time across films, persons and genres.
pub const LAST_MODIFIED: &str = "
    SELECT max(m.modified) AS modified
      FROM (SELECT max(p.modified) AS modified
              FROM content.person p
             UNION ALL
            SELECT max(g.modified) AS modified
              FROM content.genre g
             UNION ALL
            SELECT max(f.modified) AS modified
              FROM content.film_work f) m";

/// Films touched after `$1`, directly or through a credited person or a
/// genre, each with the latest contributing change time.
pub const FILMS_TO_UPDATE: &str = "
    SELECT m.id,
           max(m.modified) AS modified
      FROM (SELECT pfw.film_work_id AS id,
                   p.modified
              FROM content.person p
              JOIN content.person_film_work pfw ON pfw.person_id = p.id
             WHERE p.modified > $1
             UNION ALL
            SELECT gfw.film_work_id AS id,
                   g.modified
              FROM content.genre g
              JOIN content.genre_film_work gfw ON gfw.genre_id = g.id
             WHERE g.modified > $1
             UNION ALL
            SELECT f.id,
                   f.modified
              FROM content.film_work f
             WHERE f.modified > $1) m
     GROUP BY m.id
     ORDER BY max(m.modified), m.id";

const FILM_DOCUMENT_COLUMNS: &str = "
    SELECT fw.id,
           fw.rating AS imdb_rating,
           array_agg(DISTINCT g.name) AS genre,
           fw.title,
           fw.description,
           coalesce(array_agg(DISTINCT p.full_name) FILTER (WHERE pfw.role = 'director'), '{}') AS director,
           coalesce(array_agg(DISTINCT p.full_name) FILTER (WHERE pfw.role = 'actor'), '{}') AS actors_names,
           coalesce(array_agg(DISTINCT p.full_name) FILTER (WHERE pfw.role = 'writer'), '{}') AS writers_names,
           coalesce(json_agg(DISTINCT jsonb_build_object('id', p.id, 'name', p.full_name)) FILTER (WHERE pfw.role = 'actor'), '[]') AS actors,
           coalesce(json_agg(DISTINCT jsonb_build_object('id', p.id, 'name', p.full_name)) FILTER (WHERE pfw.role = 'writer'), '[]') AS writers
      FROM content.film_work fw
      LEFT JOIN content.person_film_work pfw ON pfw.film_work_id = fw.id
      LEFT JOIN content.person p ON p.id = pfw.person_id
      LEFT JOIN content.genre_film_work gfw ON gfw.film_work_id = fw.id
      LEFT JOIN content.genre g ON g.id = gfw.genre_id";

/// Every film as an index document.
pub fn select_all() -> String {
    format!(
        "{}
     GROUP BY fw.id
     ORDER BY fw.modified, fw.id",
        FILM_DOCUMENT_COLUMNS
    )
}

/// Films whose id is in the `uuid[]` bound to `$1`, as index documents.
pub fn select_by_ids() -> String {
    format!(
        "{}
     WHERE fw.id = ANY($1::uuid[])
     GROUP BY fw.id
     ORDER BY fw.modified, fw.id",
        FILM_DOCUMENT_COLUMNS
    )
}

/// Opens [`FILM_CURSOR`] over `query`. Must run inside a transaction.
pub fn declare_cursor(query: &str) -> String {
    format!("DECLARE {} NO SCROLL CURSOR FOR {}", FILM_CURSOR, query)
}

pub fn fetch_forward(count: usize) -> String {
    format!("FETCH FORWARD {} FROM {}", count, FILM_CURSOR)
}

pub fn close_cursor() -> String {
    format!("CLOSE {}", FILM_CURSOR)
}
