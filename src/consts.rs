// Strictly follows the APLIC memory map of the RISC-V Advanced Interrupt Architecture 1.0.

/// Number of interrupt sources an APLIC domain can address.
/// Source IDs range from 1 to 1023 (inclusive). Source 0 is reserved and does not exist.
pub const APLIC_MAX_SOURCES: usize = 1024; // includes source 0 for indexing convenience

/// Number of 32-bit words in each pending/enable bit array.
pub const APLIC_NUM_BIT_WORDS: usize = APLIC_MAX_SOURCES / 32;

/// Highest priority number (lowest urgency) with IPRIOLEN = 8.
pub const APLIC_MAX_PRIORITY: u32 = 0xFF;

/// Priority written to every target register by domain init.
pub const APLIC_DEFAULT_PRIORITY: u32 = 1;

// --- Register Offsets (relative to APLIC_BASE) ---

/// Domain configuration register.
pub const APLIC_DOMAINCFG_OFFSET: usize = 0x0000;

/// Source configuration for source 1. Source N is at: APLIC_SOURCECFG_OFFSET + (N - 1) * 4
pub const APLIC_SOURCECFG_OFFSET: usize = 0x0004;

pub const APLIC_MMSIADDRCFG_OFFSET: usize = 0x1BC0;
pub const APLIC_MMSIADDRCFGH_OFFSET: usize = 0x1BC4;
pub const APLIC_SMSIADDRCFG_OFFSET: usize = 0x1BC8;
pub const APLIC_SMSIADDRCFGH_OFFSET: usize = 0x1BCC;

/// First set-pending word. Word W covers sources [W*32, W*32+31].
pub const APLIC_SETIP_OFFSET: usize = 0x1C00;
/// Writing N sets the pending bit of source N.
pub const APLIC_SETIPNUM_OFFSET: usize = 0x1CDC;

/// First clear-pending word. Reads return the rectified input values.
pub const APLIC_IN_CLRIP_OFFSET: usize = 0x1D00;
/// Writing N clears the pending bit of source N.
pub const APLIC_CLRIPNUM_OFFSET: usize = 0x1DDC;

/// First set-enable word. Word W covers sources [W*32, W*32+31].
pub const APLIC_SETIE_OFFSET: usize = 0x1E00;
/// Writing N sets the enable bit of source N.
pub const APLIC_SETIENUM_OFFSET: usize = 0x1EDC;

/// First clear-enable word.
pub const APLIC_CLRIE_OFFSET: usize = 0x1F00;
/// Writing N clears the enable bit of source N.
pub const APLIC_CLRIENUM_OFFSET: usize = 0x1FDC;

pub const APLIC_SETIPNUM_LE_OFFSET: usize = 0x2000;
pub const APLIC_SETIPNUM_BE_OFFSET: usize = 0x2004;

pub const APLIC_GENMSI_OFFSET: usize = 0x3000;

/// Target register for source 1. Source N is at: APLIC_TARGET_OFFSET + (N - 1) * 4
pub const APLIC_TARGET_OFFSET: usize = 0x3004;

/// Offset to the interrupt delivery control (IDC) structure of hart index 0.
/// For IDC I, the structure starts at: APLIC_IDC_OFFSET + I * APLIC_IDC_STRIDE
pub const APLIC_IDC_OFFSET: usize = 0x4000;

/// Stride between IDC structures (in bytes).
pub const APLIC_IDC_STRIDE: usize = 0x20;

/// Offsets within an IDC structure.
pub const APLIC_IDC_IDELIVERY_OFFSET: usize = 0x00;
pub const APLIC_IDC_IFORCE_OFFSET: usize = 0x04;
pub const APLIC_IDC_ITHRESHOLD_OFFSET: usize = 0x08;
pub const APLIC_IDC_TOPI_OFFSET: usize = 0x18;
pub const APLIC_IDC_CLAIMI_OFFSET: usize = 0x1C;

// --- Register fields ---

/// domaincfg bits 31:24 are read-only and always read as 0x80.
pub const APLIC_DOMAINCFG_RO80: u32 = 0x80 << 24;

/// sourcecfg.D: source delegated to a child domain.
pub const APLIC_SOURCECFG_D: u32 = 1 << 10;
/// sourcecfg.SM: source mode.
pub const APLIC_SOURCECFG_SM_MASK: u32 = 0x7;

/// target.HartIndex, both delivery modes.
pub const APLIC_TARGET_HART_SHIFT: u32 = 18;
pub const APLIC_TARGET_HART_MASK: u32 = 0x3FFF;
/// target.IPRIO, direct delivery mode.
pub const APLIC_TARGET_IPRIO_MASK: u32 = 0xFF;
/// target.GuestIndex, MSI delivery mode.
pub const APLIC_TARGET_GUEST_SHIFT: u32 = 12;
pub const APLIC_TARGET_GUEST_MASK: u32 = 0x3F;
/// target.EIID, MSI delivery mode.
pub const APLIC_TARGET_EIID_MASK: u32 = 0x7FF;

/// topi/claimi interrupt identity, bits 25:16.
pub const APLIC_TOPI_ID_SHIFT: u32 = 16;
pub const APLIC_TOPI_ID_MASK: u32 = 0x3FF;
/// topi/claimi interrupt priority, bits 7:0.
pub const APLIC_TOPI_PRIO_MASK: u32 = 0xFF;

// --- Dispatch identities ---

/// Local (CLINT-level) causes are dispatched as `cause code + LOCAL_IRQ_BASE`.
pub const LOCAL_IRQ_BASE: u32 = 1024;
/// Supervisor software interrupt (IPI), scause code 1.
pub const IPI_IRQ_ID: u32 = LOCAL_IRQ_BASE + 1;
/// Supervisor timer interrupt, scause code 5.
pub const TIMER_IRQ_ID: u32 = LOCAL_IRQ_BASE + 5;
/// Size of the handler table.
pub const IRQ_NUM: usize = 1030;

/// IPIs are plain MSIs with this identity when the IMSIC delivers them.
pub const IMSIC_IPI_ID: u32 = 1;
