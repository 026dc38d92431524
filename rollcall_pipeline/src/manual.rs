/*!

This is the long-form manual for `rollcall_pipeline` and `rcprep`.

## Stages

A run goes through the following stages, each of which reports what it removed:

1. **Build** ([`crate::builder::MatrixBuilder`]): raw per-ballot records become a
   legislator × ballot matrix of `1` (yea), `0` (nay) and `9` (not eligible).
   Raw codes outside the code table count as not eligible and are reported
   as *unmapped*.
2. **Partition** ([`crate::periods::partition`]): each dated ballot goes to the
   period that contains it. Ballots with an unparsable date are excluded
   and counted. Periods without ballots are dropped.
3. **Quality filter** ([`crate::filter::filter_period`]): legislators with
   too few valid votes are removed first, then ballots with too few
   participants, then unanimous ballots.
4. **Consistency** ([`crate::consistency::enforce_consistency`]): only the
   legislators with a row in every period, and enough valid votes in each,
   are kept, in all of them. Ballots left unanimous or under the
   participation threshold by this step are listed in the report.
5. **Estimation** ([`crate::estimate_periods`]): each period is looked up in
   the cache by fingerprint, and estimated only on a miss. The fingerprint
   covers the ballots, the estimation parameters, the cut thresholds and the
   consistency bound. The result is
   checked against the unit ball, oriented with the reference blocs and
   stored.

## Periods

Periods are either given explicitly or taken from a preset:

* `yearly` 2018, 2019, both halves of 2020, 2021. Closed intervals.
* `events` five periods delimited by the main events of the legislature.
  Half-open intervals: a period ends the day the next one starts.
* `political` the three political phases of the legislature. Closed.
* `political-halves` the political phases split in halves.

The boundary rule applies to the whole run. Periods that overlap under the
chosen rule are rejected.

## Input formats

The `rcprep` command reads one of two layouts from its input directory.

### `csv`

* `votes.csv` with columns `vote_id,date,description`
* `legislators.csv` with columns `legislator_id,name,party,region,district`
* `vote_details.csv` with columns `vote_id,legislator_id,vote` where `vote`
  is the raw upstream code

Every ballot needs at least one row in `vote_details.csv`. A ballot without
any detail stops the run with a missing data error.

### `json`

A single `records.json` document:

```text
{
  "votes": [ {"id": 1, "date": "2019-03-01", "description": "..."} ],
  "legislators": [ {"id": 7, "name": "...", "party": "PS"} ],
  "details": [ {"voteId": 1, "casts": {"7": 1, "8": 0}} ]
}
```

## Output files

* `votes_matrix_<period>.csv` with a header `legislator_id,<ballot ids>`
* `vote_metadata_<period>.csv` and `vote_metadata.csv` with
  `vote_id,date,description,period`
* `legislator_metadata.csv` with `legislator_id,name,party,region,district`
* `run_report.json` with the counts of every stage and, when a cache
  directory is given, the cache status of every period
* `coordinates_<period>.csv` for the periods found in the cache

## Configuration

`rcprep --config run.json` reads a JSON document. All keys are optional and
relative paths are taken from the directory of the document:

```text
{
  "input": {"provider": "csv", "path": "data"},
  "outputDirectory": "out",
  "periodPreset": "events",
  "periods": [ {"id": "A", "label": "...", "start": "2019-01-01", "end": "2019-06-30"} ],
  "boundaryRule": "closed",
  "thresholds": {"minVotesPerLegislator": 10, "minLegislatorsPerVote": 10,
                 "dropUnanimous": true, "lopsidedThreshold": 0.025, "converge": true},
  "minValidVotesPerPeriod": 1,
  "castCodes": {"yea": [1], "nay": [0], "notEligible": [2, 9]},
  "columnOrder": "chronological",
  "fullRoster": false,
  "cacheDirectory": "cache",
  "estimation": {"dims": 2, "maxiter": 30, "xtol": 0.0001, "seed": 0}
}
```

Explicit `periods` take precedence over `periodPreset`. The command line
options `--input`, `--input-type`, `--out`, `--cache-dir`, `--periods`,
`--min-votes` and `--min-legislators` override the document.

## Cache

The cache directory holds one JSON file per fingerprint, named
`<fingerprint>.json`. Other files are left alone. A file is created
exclusively: when two runs compute the same fingerprint, the second one
finds the file and reuses it. `--evict-days N` removes the entries that were
not read in the last N days.

*/
