use bon::Builder;
use itertools::{izip, Itertools};

/// Test outcome of a single gene
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct GeneResult {
    #[builder(into)]
    pub gene: String,
    /// Estimated log2 fold-change of the contrast
    pub logfc: f64,
    /// Average log2 counts-per-million of the gene
    #[builder(default)]
    pub log_cpm: f64,
    pub statistic: f64,
    pub pvalue: f64,
    /// Initialized to the raw p-value and replaced once the whole batch is adjusted
    pub fdr: f64,
}

/// Results of one threshold test, in the order genes were supplied
#[derive(Debug, Clone, PartialEq)]
pub struct TestResults {
    pub genes: Vec<String>,
    pub logfcs: Vec<f64>,
    pub log_cpms: Vec<f64>,
    pub statistics: Vec<f64>,
    pub pvalues: Vec<f64>,
    pub fdrs: Vec<f64>,
    /// Log2 fold-change threshold the results were tested against
    pub lfc: f64,
}

impl TestResults {
    pub fn from_vec(gene_results: Vec<GeneResult>, lfc: f64) -> Self {
        let mut genes = vec![];
        let mut logfcs = vec![];
        let mut log_cpms = vec![];
        let mut statistics = vec![];
        let mut pvalues = vec![];
        let mut fdrs = vec![];

        for gene_result in gene_results {
            genes.push(gene_result.gene);
            logfcs.push(gene_result.logfc);
            log_cpms.push(gene_result.log_cpm);
            statistics.push(gene_result.statistic);
            pvalues.push(gene_result.pvalue);
            fdrs.push(gene_result.fdr);
        }

        Self {
            genes,
            logfcs,
            log_cpms,
            statistics,
            pvalues,
            fdrs,
            lfc,
        }
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn row(&self, i: usize) -> GeneResult {
        GeneResult {
            gene: self.genes[i].clone(),
            logfc: self.logfcs[i],
            log_cpm: self.log_cpms[i],
            statistic: self.statistics[i],
            pvalue: self.pvalues[i],
            fdr: self.fdrs[i],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = GeneResult> + '_ {
        (0..self.len()).map(|i| self.row(i))
    }

    pub fn get(&self, gene: &str) -> Option<GeneResult> {
        self.genes.iter().position(|g| g == gene).map(|i| self.row(i))
    }

    /// The `n` most significant genes, by ascending p-value then descending |logFC|
    pub fn top(&self, n: usize) -> Vec<GeneResult> {
        (0..self.len())
            .sorted_by(|&a, &b| {
                self.pvalues[a]
                    .total_cmp(&self.pvalues[b])
                    .then(self.logfcs[b].abs().total_cmp(&self.logfcs[a].abs()))
            })
            .take(n)
            .map(|i| self.row(i))
            .collect()
    }

    /// Signed square root of the test statistic, for ranked gene-set tests
    pub fn ranking_statistics(&self) -> Vec<f64> {
        izip!(&self.logfcs, &self.statistics)
            .map(|(logfc, stat)| logfc.signum() * stat.max(0.0).sqrt())
            .collect()
    }

    /// Binary differential expression flags, for over-representation tests
    pub fn de_flags(&self, fdr_cutoff: f64) -> Vec<bool> {
        self.fdrs.iter().map(|&q| q <= fdr_cutoff).collect()
    }

    pub fn pprint(&self) {
        println!("Gene\tlogFC\tlogCPM\tStatistic\tPValue\tFDR");
        for i in 0..self.genes.len() {
            println!(
                "{}\t{}\t{}\t{}\t{}\t{}",
                self.genes[i],
                self.logfcs[i],
                self.log_cpms[i],
                self.statistics[i],
                self.pvalues[i],
                self.fdrs[i]
            );
        }
    }
}
