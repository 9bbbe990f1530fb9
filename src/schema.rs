//! Minimal schema and table-schema model consumed by the cursor.
//!
//! Types are registered by name with an element size; a type may derive
//! from a parent, which is what makes a cast to the parent legal. Table
//! schemas hold the column declarations a colspec is matched against,
//! plus the physical members backing them.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::types::CtxId;

/// Declared type of a column: a registered type id and a dimension.
/// Type id 0 means the type is not yet known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TypeDecl {
    pub type_id: u32,
    pub dim: u32,
}

impl TypeDecl {
    /// Placeholder for columns whose type is discovered on resolution
    pub const UNKNOWN: TypeDecl = TypeDecl { type_id: 0, dim: 0 };

    pub fn is_known(&self) -> bool {
        self.type_id != 0
    }
}

/// Physical layout of a type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDesc {
    /// Bits per intrinsic element
    pub intrinsic_bits: u32,
    /// Intrinsic elements per declared element
    pub intrinsic_dim: u32,
}

impl TypeDesc {
    /// Bits per declared element
    pub fn elem_bits(&self) -> u32 {
        self.intrinsic_bits * self.intrinsic_dim
    }
}

#[derive(Debug, Clone)]
struct TypeDef {
    name: String,
    bits: u32,
    parent: Option<u32>,
}

/// Type registry
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: Vec<TypeDef>,
    by_name: BTreeMap<String, u32>,
    num_indirect: u32,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type of `bits` bits per element
    pub fn define_type(&mut self, name: &str, bits: u32) -> Result<TypeDecl> {
        self.insert_type(name, bits, None)
    }

    /// Register a type that may be cast to `parent`
    pub fn define_subtype(&mut self, name: &str, parent: TypeDecl) -> Result<TypeDecl> {
        let bits = self.typedef(parent)?.bits;
        self.insert_type(name, bits, Some(parent.type_id))
    }

    fn insert_type(&mut self, name: &str, bits: u32, parent: Option<u32>) -> Result<TypeDecl> {
        if name.is_empty() || bits == 0 {
            return Err(Error::InvalidArgument(format!("bad type definition '{}'", name)));
        }
        if self.by_name.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        self.types.push(TypeDef {
            name: name.to_string(),
            bits,
            parent,
        });
        let type_id = self.types.len() as u32;
        self.by_name.insert(name.to_string(), type_id);
        Ok(TypeDecl { type_id, dim: 1 })
    }

    /// Number of indirect binding slots productions may use
    pub fn num_indirect(&self) -> u32 {
        self.num_indirect
    }

    pub fn set_num_indirect(&mut self, count: u32) {
        self.num_indirect = count;
    }

    /// Parse `name` or `name[dim]` into a typedecl
    pub fn resolve_typedecl(&self, text: &str) -> Result<TypeDecl> {
        let text = text.trim();
        let (name, dim) = match text.find('[') {
            Some(open) if text.ends_with(']') => {
                let dim = text[open + 1..text.len() - 1]
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| Error::InvalidArgument(format!("bad dimension in '{}'", text)))?;
                (text[..open].trim(), dim)
            }
            Some(_) => return Err(Error::InvalidArgument(format!("bad typedecl '{}'", text))),
            None => (text, 1),
        };
        if dim == 0 {
            return Err(Error::InvalidArgument(format!("zero dimension in '{}'", text)));
        }
        let type_id = *self
            .by_name
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("type '{}'", name)))?;
        Ok(TypeDecl { type_id, dim })
    }

    /// Layout of a typedecl
    pub fn describe(&self, td: TypeDecl) -> Result<TypeDesc> {
        let def = self.typedef(td)?;
        Ok(TypeDesc {
            intrinsic_bits: def.bits,
            intrinsic_dim: td.dim,
        })
    }

    pub fn type_name(&self, td: TypeDecl) -> Option<&str> {
        self.typedef(td).ok().map(|def| def.name.as_str())
    }

    /// Render a typedecl the way `resolve_typedecl` parses it
    pub fn typedecl_string(&self, td: TypeDecl) -> String {
        match self.type_name(td) {
            Some(name) if td.dim == 1 => name.to_string(),
            Some(name) => format!("{}[{}]", name, td.dim),
            None => "<unknown>".to_string(),
        }
    }

    /// True when a value of type `from` may be read as `to`: same type,
    /// or `to` is an ancestor of `from`, with equal dimensions
    pub fn cast_to(&self, from: TypeDecl, to: TypeDecl) -> bool {
        if from.dim != to.dim || !from.is_known() {
            return false;
        }
        let mut current = Some(from.type_id);
        while let Some(id) = current {
            if id == to.type_id {
                return true;
            }
            current = self.types.get(id as usize - 1).and_then(|def| def.parent);
        }
        false
    }

    fn typedef(&self, td: TypeDecl) -> Result<&TypeDef> {
        if !td.is_known() {
            return Err(Error::NotFound("type id 0".into()));
        }
        self.types
            .get(td.type_id as usize - 1)
            .ok_or_else(|| Error::NotFound(format!("type id {}", td.type_id)))
    }
}

/// A column declared by a table schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDecl {
    /// Stable content id
    pub cid: CtxId,
    pub name: String,
    pub td: TypeDecl,
    /// Has a read rule
    pub readable: bool,
    /// Chosen when several declarations share the name
    pub default: bool,
    /// Physical member the read rule draws from, if any
    pub source: Option<String>,
}

/// A physical member (`.name`) declared by a table schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalDecl {
    pub cid: CtxId,
    pub name: String,
    pub td: Option<TypeDecl>,
    /// Declared but not implemented by this table
    pub is_virtual: bool,
}

/// Result of matching a colspec
#[derive(Debug, Clone)]
pub struct ColumnMatch {
    pub decl: ColumnDecl,
    /// Type named by a cast expression
    pub cast: Option<TypeDecl>,
    /// Every declaration sharing the matched name
    pub overloads: Vec<CtxId>,
}

/// Column and physical declarations of one table
#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    ctx: u32,
    next_id: u32,
    columns: Vec<ColumnDecl>,
    physicals: Vec<PhysicalDecl>,
}

impl TableSchema {
    /// Create an empty table schema; `ctx` qualifies every id it hands out
    pub fn new(name: &str, ctx: u32) -> Self {
        TableSchema {
            name: name.to_string(),
            ctx,
            next_id: 0,
            columns: Vec::new(),
            physicals: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn next_cid(&mut self) -> CtxId {
        let cid = CtxId::new(self.ctx, self.next_id);
        self.next_id += 1;
        cid
    }

    /// Declare a readable column
    pub fn add_column(&mut self, name: &str, td: TypeDecl) -> CtxId {
        self.push_column(name, td, true, None)
    }

    /// Declare a readable column reading physical member `source`
    pub fn add_column_from(&mut self, name: &str, td: TypeDecl, source: &str) -> CtxId {
        self.push_column(name, td, true, Some(source.to_string()))
    }

    /// Declare a column with no read rule
    pub fn add_write_only_column(&mut self, name: &str, td: TypeDecl) -> CtxId {
        self.push_column(name, td, false, None)
    }

    fn push_column(&mut self, name: &str, td: TypeDecl, readable: bool, source: Option<String>) -> CtxId {
        let cid = self.next_cid();
        self.columns.push(ColumnDecl {
            cid,
            name: name.to_string(),
            td,
            readable,
            default: false,
            source,
        });
        cid
    }

    /// Make `cid` the default among same-named declarations
    pub fn set_default(&mut self, cid: CtxId) -> Result<()> {
        let name = self
            .column(cid)
            .map(|c| c.name.clone())
            .ok_or_else(|| Error::NotFound(format!("column {}", cid)))?;
        for col in self.columns.iter_mut().filter(|c| c.name == name) {
            col.default = col.cid == cid;
        }
        Ok(())
    }

    /// Declare a physical member
    pub fn add_physical(&mut self, name: &str, td: Option<TypeDecl>) -> CtxId {
        self.push_physical(name, td, false)
    }

    /// Declare a physical member this table does not implement
    pub fn add_virtual_physical(&mut self, name: &str) -> CtxId {
        self.push_physical(name, None, true)
    }

    fn push_physical(&mut self, name: &str, td: Option<TypeDecl>, is_virtual: bool) -> CtxId {
        let cid = self.next_cid();
        self.physicals.push(PhysicalDecl {
            cid,
            name: name.to_string(),
            td,
            is_virtual,
        });
        cid
    }

    pub fn columns(&self) -> &[ColumnDecl] {
        &self.columns
    }

    pub fn physicals(&self) -> &[PhysicalDecl] {
        &self.physicals
    }

    pub fn column(&self, cid: CtxId) -> Option<&ColumnDecl> {
        self.columns.iter().find(|c| c.cid == cid)
    }

    pub fn physical(&self, name: &str) -> Option<&PhysicalDecl> {
        self.physicals.iter().find(|p| p.name == name)
    }

    /// True if `name` names a column declaration
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Ids of every declaration named `name`
    pub fn overloads(&self, name: &str) -> Vec<CtxId> {
        self.columns.iter().filter(|c| c.name == name).map(|c| c.cid).collect()
    }

    /// Copy for per-cursor extension
    pub fn clone_extend(&self) -> Self {
        self.clone()
    }

    /// Implement physical member `pname`: a virtual declaration becomes
    /// concrete in place, otherwise a new member is added
    pub fn implicit_phys_member(&mut self, td: Option<TypeDecl>, pname: &str) -> CtxId {
        if let Some(phys) = self.physicals.iter_mut().find(|p| p.name == pname) {
            phys.is_virtual = false;
            if phys.td.is_none() {
                phys.td = td;
            }
            return phys.cid;
        }
        self.push_physical(pname, td, false)
    }

    /// Add a readable column `cname` reading `pname`; its type comes from
    /// the physical member, or is left unknown
    pub fn implicit_col_member(&mut self, cname: &str, pname: &str) -> CtxId {
        let td = self
            .physical(pname)
            .and_then(|p| p.td)
            .unwrap_or(TypeDecl::UNKNOWN);
        self.push_column(cname, td, true, Some(pname.to_string()))
    }

    /// Record the type discovered for an incomplete column
    pub fn repair_typedecl(&mut self, cid: CtxId, td: TypeDecl) {
        if let Some(col) = self.columns.iter_mut().find(|c| c.cid == cid) {
            if !col.td.is_known() {
                col.td = td;
            }
        }
    }

    /// Match a colspec: a bare name, or `(type) name`
    pub fn find(&self, schema: &Schema, colspec: &str) -> Result<ColumnMatch> {
        let (cast, name) = parse_colspec(schema, colspec)?;

        let overloads: Vec<&ColumnDecl> = self.columns.iter().filter(|c| c.name == name).collect();
        if overloads.is_empty() {
            return Err(Error::NotFound(format!("column '{}'", name)));
        }

        let decl = match cast {
            Some(cast) => overloads
                .iter()
                .find(|c| c.td == cast)
                .or_else(|| overloads.iter().find(|c| schema.cast_to(c.td, cast)))
                .or_else(|| overloads.iter().find(|c| !c.td.is_known()))
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "column '{}' as {}",
                        name,
                        schema.typedecl_string(cast)
                    ))
                })?,
            None if overloads.len() == 1 => &overloads[0],
            None => overloads
                .iter()
                .find(|c| c.default)
                .ok_or_else(|| Error::Ambiguous(name.to_string()))?,
        };

        Ok(ColumnMatch {
            decl: (*decl).clone(),
            cast,
            overloads: overloads.iter().map(|c| c.cid).collect(),
        })
    }
}

impl fmt::Display for TableSchema {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Split a colspec into an optional cast and a column name
fn parse_colspec<'a>(schema: &Schema, colspec: &'a str) -> Result<(Option<TypeDecl>, &'a str)> {
    let spec = colspec.trim();
    if let Some(rest) = spec.strip_prefix('(') {
        let close = rest
            .find(')')
            .ok_or_else(|| Error::InvalidArgument(format!("unterminated cast in '{}'", colspec)))?;
        let cast = schema.resolve_typedecl(&rest[..close])?;
        let name = rest[close + 1..].trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument(format!("no column name in '{}'", colspec)));
        }
        return Ok((Some(cast), name));
    }
    Ok((None, spec))
}
