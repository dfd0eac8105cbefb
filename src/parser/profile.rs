// Per-registry attribute tables consumed by `RecordParser`.
//
// Each registry formats its objects differently; these tables say which
// attribute keys become which columns and how a record is delimited.

/// How a record ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// A blank line finalizes the record (RPSL flat-file dumps)
    BlankLine,
    /// Only the next primary-key line (or end of input) finalizes the record;
    /// blank lines are remembered for the address-close rule (whois replies)
    PrimaryKey,
}

/// Value conversion applied when an attribute is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Plain,
    /// `192.0.2.0/24` -> column `prefix` + `prefix_len`
    Prefix,
    /// `AS65000`, `AS1.1`, `AS100 # comment` -> plain decimal ASN
    OriginAsn,
}

#[derive(Debug, Clone, Copy)]
pub struct Attribute {
    pub key: &'static str,
    pub column: &'static str,
    pub transform: Transform,
}

const fn attr(key: &'static str, column: &'static str) -> Attribute {
    Attribute {
        key,
        column,
        transform: Transform::Plain,
    }
}

const fn attr_with(key: &'static str, column: &'static str, transform: Transform) -> Attribute {
    Attribute {
        key,
        column,
        transform,
    }
}

#[derive(Debug)]
pub struct Profile {
    pub name: &'static str,
    pub attributes: &'static [Attribute],
    /// Columns whose repeated attributes are newline-appended instead of replaced
    pub multi_valued: &'static [&'static str],
    /// Attribute keys whose indented continuation lines are kept
    pub continuable: &'static [&'static str],
    /// Attribute keys that start a new record
    pub primary_keys: &'static [&'static str],
    /// Columns a record must carry to be emitted
    pub required: &'static [&'static str],
    pub boundary: Boundary,
    /// Stop accepting attributes once the organisation address is complete
    pub close_after_address: bool,
    /// Keep the record's text in `raw_output`
    pub keep_raw: bool,
    /// Fill `country`/`state_prov` from the last address lines
    pub derive_location: bool,
    /// Drop records whose `as_number` is a range (`1 - 1876`)
    pub reject_ranges: bool,
}

impl Profile {
    pub fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.key == key)
    }

    pub fn is_primary_key(&self, key: &str) -> bool {
        self.primary_keys.contains(&key)
    }

    pub fn is_multi_valued(&self, column: &str) -> bool {
        self.multi_valued.contains(&column)
    }

    pub fn is_continuable(&self, key: &str) -> bool {
        self.continuable.contains(&key)
    }

    /// Profile used to read the reply of the named whois source
    pub fn for_whois_source(source: &str) -> &'static Profile {
        match source {
            "arin" => &ARIN,
            "lacnic" => &LACNIC,
            _ => &RPSL_AUTNUM,
        }
    }
}

/// whois.arin.net
pub static ARIN: Profile = Profile {
    name: "arin",
    attributes: &[
        attr("ASName", "as_name"),
        attr("ASNumber", "as_number"),
        attr("OrgId", "org_id"),
        attr("OrgName", "org_name"),
        attr("Address", "address"),
        attr("City", "city"),
        attr("StateProv", "state_prov"),
        attr("PostalCode", "postal_code"),
        attr("Country", "country"),
        attr("Comment", "remarks"),
    ],
    multi_valued: &["remarks", "address"],
    continuable: &["Comment"],
    primary_keys: &["ASNumber"],
    required: &["as_number"],
    boundary: Boundary::PrimaryKey,
    close_after_address: false,
    keep_raw: true,
    derive_location: true,
    reject_ranges: true,
};

/// RIPE, APNIC, AFRINIC and RPSL mirrors such as rr.ntt.net. The last
/// `aut-num` object wins; the organisation address ends the useful data.
pub static RPSL_AUTNUM: Profile = Profile {
    name: "rpsl-aut-num",
    attributes: &[
        attr("aut-num", "as_number"),
        attr("as-name", "as_name"),
        attr("descr", "remarks"),
        attr("org", "org_id"),
        attr("org-name", "org_name"),
        attr("address", "address"),
        attr("country", "country"),
    ],
    multi_valued: &["remarks", "address"],
    continuable: &["descr", "address"],
    primary_keys: &["aut-num"],
    required: &["as_number"],
    boundary: Boundary::PrimaryKey,
    close_after_address: true,
    keep_raw: true,
    derive_location: true,
    reject_ranges: true,
};

/// whois.lacnic.net; `owner` sits inside the aut-num block, so only
/// `aut-num` opens a new record.
pub static LACNIC: Profile = Profile {
    name: "lacnic",
    attributes: &[
        attr("aut-num", "as_number"),
        attr("owner", "org_name"),
        attr("ownerid", "as_name"),
        attr("address", "address"),
        attr("country", "country"),
    ],
    multi_valued: &["address"],
    continuable: &["address"],
    primary_keys: &["aut-num"],
    required: &["as_number"],
    boundary: Boundary::PrimaryKey,
    close_after_address: true,
    keep_raw: true,
    derive_location: true,
    reject_ranges: true,
};

/// `route`/`route6` objects of IRR database dumps (RADb, RIPE, APNIC, ...)
pub static RPSL_ROUTE: Profile = Profile {
    name: "rpsl-route",
    attributes: &[
        attr_with("route", "prefix", Transform::Prefix),
        attr_with("route6", "prefix", Transform::Prefix),
        attr("descr", "descr"),
        attr_with("origin", "origin_as", Transform::OriginAsn),
    ],
    multi_valued: &["descr"],
    continuable: &["descr"],
    primary_keys: &["route", "route6"],
    required: &["prefix", "prefix_len", "origin_as"],
    boundary: Boundary::BlankLine,
    close_after_address: false,
    keep_raw: false,
    derive_location: false,
    reject_ranges: false,
};
