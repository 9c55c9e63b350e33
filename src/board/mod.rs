pub mod team;

use serde::{Deserialize, Serialize};
use std::path::Path;

pub use team::{MegaSlot, MegaThreshold, SpeciesBinding, Team, TeamError};

/// Board tokens with a fixed meaning; team keys may not reuse them.
pub const RESERVED_TOKENS: [&str; 6] = [".", "W", "M", "$", "R", "X"];

/// Index of a species in the team roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpeciesId(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Tile {
    #[default]
    Empty,
    Species(SpeciesId),
    Wood,
    Metal,
    Coin,
    Rock,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cell {
    pub tile: Tile,
    pub frozen: bool,
}

impl Cell {
    pub fn new(tile: Tile) -> Self {
        Cell { tile, frozen: false }
    }

    pub fn frozen(tile: Tile) -> Self {
        Cell { tile, frozen: true }
    }

    pub fn is_empty(&self) -> bool {
        self.tile == Tile::Empty
    }

    pub fn is_wood(&self) -> bool {
        self.tile == Tile::Wood
    }

    pub fn is_metal(&self) -> bool {
        self.tile == Tile::Metal
    }

    pub fn is_coin(&self) -> bool {
        self.tile == Tile::Coin
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

/// A board position. Row 0 is the top row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub row: usize,
    pub col: usize,
}

impl Coord {
    pub const fn new(row: usize, col: usize) -> Self {
        Coord { row, col }
    }
}

impl std::fmt::Display for Coord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 1-based, as players count rows and columns
        write!(f, "({},{})", self.row + 1, self.col + 1)
    }
}

/// Errors raised while building or checking a board.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardError {
    EmptyBoard,
    RaggedRow { row: usize, expected: usize, found: usize },
    UnknownToken { row: usize, col: usize, token: String },
    CellCountMismatch { width: usize, height: usize, cells: usize },
}

impl std::fmt::Display for BoardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoardError::EmptyBoard => write!(f, "Board has no cells"),
            BoardError::RaggedRow {
                row,
                expected,
                found,
            } => write!(
                f,
                "Row {} has {} cells, expected {}",
                row + 1,
                found,
                expected
            ),
            BoardError::UnknownToken { row, col, token } => write!(
                f,
                "Unknown token '{}' at row {}, column {}",
                token,
                row + 1,
                col + 1
            ),
            BoardError::CellCountMismatch {
                width,
                height,
                cells,
            } => write!(
                f,
                "Board claims {}x{} but stores {} cells",
                width, height, cells
            ),
        }
    }
}

impl std::error::Error for BoardError {}

/// Board file contents: one string per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardFile {
    pub rows: Vec<String>,
}

/// Fixed-size grid of cells, stored row-major.
///
/// Deserialised boards skip the constructor checks; call [`Board::validate`] before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
}

impl Board {
    /// An all-empty board.
    pub fn new(width: usize, height: usize) -> Result<Self, BoardError> {
        if width == 0 || height == 0 {
            return Err(BoardError::EmptyBoard);
        }
        Ok(Board {
            width,
            height,
            cells: vec![Cell::default(); width * height],
        })
    }

    /// Build a board from raw parts, rejecting inconsistent dimensions.
    pub fn from_cells(width: usize, height: usize, cells: Vec<Cell>) -> Result<Self, BoardError> {
        let board = Board {
            width,
            height,
            cells,
        };
        board.validate()?;
        Ok(board)
    }

    pub fn from_file(path: &Path, team: &Team) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
        let file: BoardFile = toml::from_str(&content)
            .map_err(|e| format!("Invalid TOML in {}: {}", path.display(), e))?;
        Board::from_rows(&file.rows, team).map_err(|e| format!("{}: {}", path.display(), e))
    }

    /// Parse whitespace-separated rows of tokens.
    ///
    /// `.` empty, `W` wood, `M` metal, `$` coin, `R` rock, `X` block, anything else is
    /// looked up as a team key. A trailing `*` freezes the cell.
    pub fn from_rows<S: AsRef<str>>(rows: &[S], team: &Team) -> Result<Self, BoardError> {
        let rows: Vec<&str> = rows
            .iter()
            .map(|r| r.as_ref().trim())
            .filter(|r| !r.is_empty())
            .collect();
        let height = rows.len();
        if height == 0 {
            return Err(BoardError::EmptyBoard);
        }

        let mut width = 0;
        let mut cells = Vec::new();
        for (row, line) in rows.iter().enumerate() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if row == 0 {
                width = tokens.len();
            } else if tokens.len() != width {
                return Err(BoardError::RaggedRow {
                    row,
                    expected: width,
                    found: tokens.len(),
                });
            }
            for (col, token) in tokens.into_iter().enumerate() {
                cells.push(parse_cell(token, team).ok_or_else(|| BoardError::UnknownToken {
                    row,
                    col,
                    token: token.to_string(),
                })?);
            }
        }

        Board::from_cells(width, height, cells)
    }

    /// Parse a multi-line board string.
    pub fn parse(text: &str, team: &Team) -> Result<Self, BoardError> {
        let rows: Vec<&str> = text.lines().collect();
        Board::from_rows(&rows, team)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Check that the cell storage matches the claimed dimensions.
    pub fn validate(&self) -> Result<(), BoardError> {
        if self.width == 0 || self.height == 0 {
            return Err(BoardError::EmptyBoard);
        }
        if self.cells.len() != self.width * self.height {
            return Err(BoardError::CellCountMismatch {
                width: self.width,
                height: self.height,
                cells: self.cells.len(),
            });
        }
        Ok(())
    }

    pub fn contains(&self, coord: Coord) -> bool {
        coord.row < self.height && coord.col < self.width
    }

    pub fn get(&self, coord: Coord) -> Cell {
        self.cells[coord.row * self.width + coord.col]
    }

    pub fn set(&mut self, coord: Coord, cell: Cell) {
        self.cells[coord.row * self.width + coord.col] = cell;
    }

    pub fn tile(&self, coord: Coord) -> Tile {
        self.get(coord).tile
    }

    pub fn set_tile(&mut self, coord: Coord, tile: Tile) {
        self.cells[coord.row * self.width + coord.col].tile = tile;
    }

    pub fn is_frozen(&self, coord: Coord) -> bool {
        self.get(coord).frozen
    }

    /// Exchange the contents of two cells.
    pub fn swap(&mut self, a: Coord, b: Coord) {
        let ia = a.row * self.width + a.col;
        let ib = b.row * self.width + b.col;
        self.cells.swap(ia, ib);
    }

    /// All coordinates in reading order.
    pub fn coords(&self) -> impl Iterator<Item = Coord> + use<> {
        let width = self.width;
        (0..self.height).flat_map(move |row| (0..width).map(move |col| Coord::new(row, col)))
    }

    /// Orthogonal neighbours inside the board.
    pub fn neighbors(&self, coord: Coord) -> impl Iterator<Item = Coord> + use<> {
        let (width, height) = (self.width, self.height);
        let Coord { row, col } = coord;
        [
            (row > 0).then(|| Coord::new(row - 1, col)),
            (row + 1 < height).then(|| Coord::new(row + 1, col)),
            (col > 0).then(|| Coord::new(row, col - 1)),
            (col + 1 < width).then(|| Coord::new(row, col + 1)),
        ]
        .into_iter()
        .flatten()
    }

    /// Render back to the row format accepted by [`Board::from_rows`].
    pub fn to_rows(&self, team: &Team) -> Vec<String> {
        (0..self.height)
            .map(|row| {
                (0..self.width)
                    .map(|col| cell_token(self.get(Coord::new(row, col)), team))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }
}

fn parse_cell(token: &str, team: &Team) -> Option<Cell> {
    let (body, frozen) = match token.strip_suffix('*') {
        Some(body) => (body, true),
        None => (token, false),
    };
    let tile = match body {
        "." => Tile::Empty,
        "W" => Tile::Wood,
        "M" => Tile::Metal,
        "$" => Tile::Coin,
        "R" => Tile::Rock,
        "X" => Tile::Block,
        key => Tile::Species(team.species_for_key(key)?),
    };
    Some(Cell { tile, frozen })
}

fn cell_token(cell: Cell, team: &Team) -> String {
    let body = match cell.tile {
        Tile::Empty => ".",
        Tile::Wood => "W",
        Tile::Metal => "M",
        Tile::Coin => "$",
        Tile::Rock => "R",
        Tile::Block => "X",
        Tile::Species(id) => team.binding(id).map(|b| b.key.as_str()).unwrap_or("?"),
    };
    if cell.frozen {
        format!("{}*", body)
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::team::tests::sample_team;
    use super::*;

    #[test]
    fn parse_reads_every_token_kind() {
        let team = sample_team();
        let board = Board::parse("A B* .\nW M $\nR X C", &team).unwrap();
        assert_eq!(board.width(), 3);
        assert_eq!(board.height(), 3);
        assert_eq!(board.tile(Coord::new(0, 0)), Tile::Species(SpeciesId(0)));
        assert!(board.is_frozen(Coord::new(0, 1)));
        assert!(board.get(Coord::new(0, 2)).is_empty());
        assert!(board.get(Coord::new(1, 0)).is_wood());
        assert!(board.get(Coord::new(1, 1)).is_metal());
        assert!(board.get(Coord::new(1, 2)).is_coin());
        assert_eq!(board.tile(Coord::new(2, 0)), Tile::Rock);
        assert_eq!(board.tile(Coord::new(2, 1)), Tile::Block);
        assert_eq!(board.tile(Coord::new(2, 2)), Tile::Species(SpeciesId(2)));
    }

    #[test]
    fn blank_lines_ignored() {
        let team = sample_team();
        let board = Board::parse("\n  A B\n\n  C D\n", &team).unwrap();
        assert_eq!((board.width(), board.height()), (2, 2));
    }

    #[test]
    fn ragged_rows_rejected() {
        let team = sample_team();
        let err = Board::parse("A B C\nA B", &team).unwrap_err();
        assert_eq!(
            err,
            BoardError::RaggedRow {
                row: 1,
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn unknown_tokens_rejected() {
        let team = sample_team();
        let err = Board::parse("A Q", &team).unwrap_err();
        assert!(err.to_string().contains("'Q'"));
    }

    #[test]
    fn empty_text_rejected() {
        let team = sample_team();
        assert_eq!(Board::parse("  \n", &team), Err(BoardError::EmptyBoard));
    }

    #[test]
    fn mismatched_cell_storage_rejected() {
        let err = Board::from_cells(3, 3, vec![Cell::default(); 8]).unwrap_err();
        assert!(matches!(err, BoardError::CellCountMismatch { cells: 8, .. }));
    }

    #[test]
    fn rows_round_trip_through_text() {
        let team = sample_team();
        let rows = vec!["A B* .".to_string(), "W $ D".to_string()];
        let board = Board::from_rows(&rows, &team).unwrap();
        assert_eq!(board.to_rows(&team), rows);
    }

    #[test]
    fn neighbors_stay_on_board() {
        let board = Board::new(3, 2).unwrap();
        let corner: Vec<_> = board.neighbors(Coord::new(0, 0)).collect();
        assert_eq!(corner, vec![Coord::new(1, 0), Coord::new(0, 1)]);
        assert_eq!(board.neighbors(Coord::new(1, 1)).count(), 3);
    }

    #[test]
    fn swap_exchanges_cells() {
        let team = sample_team();
        let mut board = Board::parse("A B*", &team).unwrap();
        board.swap(Coord::new(0, 0), Coord::new(0, 1));
        assert_eq!(board.get(Coord::new(0, 0)), Cell::frozen(Tile::Species(SpeciesId(1))));
        assert_eq!(board.get(Coord::new(0, 1)), Cell::new(Tile::Species(SpeciesId(0))));
    }

    #[test]
    fn board_file_loads_from_disk() {
        use std::io::Write;
        let team = sample_team();
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "rows = [\"A B\", \"C D\"]").unwrap();
        let board = Board::from_file(tmp.path(), &team).unwrap();
        assert_eq!(board.tile(Coord::new(1, 1)), Tile::Species(SpeciesId(3)));
    }

    #[test]
    fn coord_displays_one_based() {
        assert_eq!(Coord::new(0, 4).to_string(), "(1,5)");
    }
}
