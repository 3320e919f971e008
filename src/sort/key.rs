/// Key specifications for fixed-length binary records.
///
/// SPEC format: comma-separated 4-tuples `pos,len,type,order`, e.g.
/// `sort(1,4,w,a, 5,4,w,d)`. Positions are 1-based byte offsets.

/// Key value interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// 'c' - unsigned lexicographic byte sequence, arbitrary length.
    Character,
    /// 'w' - two's-complement signed integer, little-endian.
    LittleEndianInt,
    /// 'W' - two's-complement signed integer, big-endian.
    BigEndianInt,
    /// 'f' - IEEE 754 binary32/binary64, little-endian.
    LittleEndianFloat,
}

impl KeyType {
    /// Parse the single-character type code.
    pub fn parse(c: char) -> Result<KeyType, String> {
        match c {
            'c' => Ok(KeyType::Character),
            'w' => Ok(KeyType::LittleEndianInt),
            'W' => Ok(KeyType::BigEndianInt),
            'f' => Ok(KeyType::LittleEndianFloat),
            _ => Err(format!("unknown key type '{}'", c)),
        }
    }
}

/// Direction of comparison for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// 'a'
    Ascending,
    /// 'd'
    Descending,
}

impl SortOrder {
    /// Parse the single-character order code.
    pub fn parse(c: char) -> Result<SortOrder, String> {
        match c {
            'a' => Ok(SortOrder::Ascending),
            'd' => Ok(SortOrder::Descending),
            _ => Err(format!("unknown sort order '{}'", c)),
        }
    }
}

/// One element of the sort specification: a field within the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    /// 1-based byte offset into the record.
    pub position: usize,
    /// Byte width of the key.
    pub length: usize,
    pub ty: KeyType,
    pub order: SortOrder,
}

impl KeySpec {
    /// 0-based byte offset of the key within the record.
    #[inline]
    pub fn offset(&self) -> usize {
        self.position - 1
    }

    /// Admission check against a record length. Comparison paths rely on
    /// every admitted key passing this; they do not re-check bounds.
    pub fn validate(&self, record_len: usize) -> Result<(), String> {
        if self.position == 0 {
            return Err("key position must be >= 1 (1-based)".to_string());
        }
        if self.length == 0 {
            return Err("key length must be >= 1".to_string());
        }
        if self.offset() + self.length > record_len {
            return Err(format!(
                "key at position {} with length {} extends beyond record length {}",
                self.position, self.length, record_len
            ));
        }
        match self.ty {
            KeyType::Character => {}
            KeyType::LittleEndianInt | KeyType::BigEndianInt => {
                if !matches!(self.length, 2 | 4 | 8) {
                    return Err("integer key length must be 2, 4, or 8 bytes".to_string());
                }
            }
            KeyType::LittleEndianFloat => {
                if !matches!(self.length, 4 | 8) {
                    return Err("float key length must be 4 or 8 bytes".to_string());
                }
            }
        }
        Ok(())
    }
}

/// Parse a sort specification like "1,4,w,a,5,4,w,d" into an ordered key
/// list. Tokens may carry surrounding whitespace.
pub fn parse_sort_spec(spec: &str) -> Result<Vec<KeySpec>, String> {
    let tokens: Vec<&str> = spec.split(',').map(str::trim).collect();

    if tokens.len() % 4 != 0 || tokens.is_empty() || tokens[0].is_empty() {
        return Err(
            "sort specification must have 4 fields per key: position,length,type,order"
                .to_string(),
        );
    }

    let mut keys = Vec::with_capacity(tokens.len() / 4);
    for quad in tokens.chunks_exact(4) {
        let position = quad[0]
            .parse::<usize>()
            .map_err(|_| format!("invalid key position '{}'", quad[0]))?;
        let length = quad[1]
            .parse::<usize>()
            .map_err(|_| format!("invalid key length '{}'", quad[1]))?;

        let mut ty_chars = quad[2].chars();
        let ty = match (ty_chars.next(), ty_chars.next()) {
            (Some(c), None) => KeyType::parse(c)?,
            _ => return Err("key type must be a single character".to_string()),
        };

        let mut ord_chars = quad[3].chars();
        let order = match (ord_chars.next(), ord_chars.next()) {
            (Some(c), None) => SortOrder::parse(c)?,
            _ => return Err("sort order must be a single character".to_string()),
        };

        keys.push(KeySpec {
            position,
            length,
            ty,
            order,
        });
    }

    Ok(keys)
}

/// Validate a whole key list against a record length.
pub fn validate_keys(keys: &[KeySpec], record_len: usize) -> Result<(), String> {
    if keys.is_empty() {
        return Err("key list must not be empty".to_string());
    }
    for key in keys {
        key.validate(record_len)?;
    }
    Ok(())
}
